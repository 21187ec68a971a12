use std::process;

use clap::{Parser, Subcommand};
use reflex_core::error::ReflexError;
use reflex_core::{Assembly, TypeHandle, TypeKind, Value};
use reflex_utils::{debug, info, init_logging};

mod demo;
mod parse;

/// Inspect and call into this binary through its own debug information.
#[derive(Parser, Debug)]
#[command(name = "reflex")]
#[command(version)]
#[command(about = "Inspect and call into the running binary through its own debug information", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List declared type names
    Types
    {
        #[command(flatten)]
        listing: Listing,
    },
    /// List functions and their live entry addresses
    Functions
    {
        #[command(flatten)]
        listing: Listing,
    },
    /// List package-level variables and their current values
    Globals
    {
        #[command(flatten)]
        listing: Listing,
    },
    /// List registered images
    Images,
    /// Describe one type
    Type
    {
        /// Canonical type name (e.g. `reflex::demo::Point`)
        name: String,
    },
    /// Show the call signature of a function
    Signature
    {
        /// Qualified or linkage name
        name: String,
        /// Treat the trailing slice parameter as variadic
        #[arg(long, default_value_t = false)]
        variadic: bool,
    },
    /// Call a function with arguments parsed from the command line
    Call
    {
        /// Qualified or linkage name
        name: String,
        /// Treat the trailing slice parameter as variadic
        #[arg(long, default_value_t = false)]
        variadic: bool,
        /// Arguments, parsed according to the parameter types
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List shared objects loaded into this process
    Plugins,
    /// Resolve an address to a function and source location
    Symbolicate
    {
        /// Address to resolve (hex format: 0x1000 or decimal)
        address: String,
    },
}

/// Filtering shared by the listing commands
#[derive(clap::Args, Debug)]
struct Listing
{
    /// Only show names containing this text
    #[arg(short, long)]
    filter: Option<String>,
    /// Stop after this many entries
    #[arg(short, long)]
    limit: Option<usize>,
}

impl Listing
{
    fn matches(&self, name: &str) -> bool
    {
        self.filter.as_deref().map_or(true, |filter| name.contains(filter))
    }

    fn limit(&self) -> usize
    {
        self.limit.unwrap_or(usize::MAX)
    }
}

fn main()
{
    let _guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    demo::keep_alive();
    let cli = Cli::parse();

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    let assembly = Assembly::open()?;
    debug!(epoch = assembly.epoch(), "assembly ready");

    match cli.command {
        Commands::Types { listing } => {
            let mut shown = 0;
            assembly.for_each_type_name(|name| {
                if listing.matches(name) {
                    println!("{name}");
                    shown += 1;
                }
                shown < listing.limit()
            })?;
        }
        Commands::Functions { listing } => {
            let mut shown = 0;
            assembly.for_each_function(|name, entry| {
                if listing.matches(name) {
                    println!("{entry}  {name}");
                    shown += 1;
                }
                shown < listing.limit()
            })?;
        }
        Commands::Globals { listing } => {
            let mut shown = 0;
            assembly.for_each_global(|name, value| {
                if listing.matches(name) {
                    println!("{name}: {} = {value}", value.ty());
                    shown += 1;
                }
                shown < listing.limit()
            })?;
        }
        Commands::Images => {
            for image in assembly.images()? {
                println!(
                    "{} {} [{}..{}) bias {:#x}{}{}",
                    image.id,
                    image.path.display(),
                    image.start,
                    image.end,
                    image.bias,
                    if image.primary { " (primary)" } else { "" },
                    if image.has_debug_info { "" } else { " (no debug info)" },
                );
            }
        }
        Commands::Type { name } => {
            let ty = assembly.find_type(&name)?;
            print_type(&ty);
        }
        Commands::Signature { name, variadic } => {
            let entry = assembly.find_function_entry(&name)?;
            let ty = assembly.find_function_type(&name, variadic)?;
            println!("{}{}", entry.name, ty);
            println!("  entry: {}", entry.entry);
            if let Some(linkage) = &entry.linkage {
                println!("  linkage: {}", linkage.raw());
            }
        }
        Commands::Call { name, variadic, args } => {
            let callable = assembly.find_function(&name, variadic)?;
            let values = parse_arguments(callable.function_type(), &args)?;
            info!(function = %callable.name(), args = values.len(), "calling");

            // SAFETY: the function comes from this binary's own debug information.
            let results = unsafe { callable.call(&values)? };
            for (name, value) in callable.function_type().output_names().iter().zip(&results) {
                println!("{name}: {} = {value}", value.ty());
            }
        }
        Commands::Plugins => {
            let (paths, addresses) = assembly.search_plugins()?;
            for (path, address) in paths.iter().zip(&addresses) {
                if path.as_os_str().is_empty() {
                    println!("{address}  <anonymous>");
                } else {
                    println!("{address}  {}", path.display());
                }
            }
        }
        Commands::Symbolicate { address } => {
            let address = parse::parse_address(&address)?;
            let Some(symbolication) = assembly.symbolicate(address) else {
                return Err(ReflexError::NotFound {
                    kind: "symbol",
                    name: address.to_string(),
                }
                .into());
            };
            for (depth, frame) in symbolication.frames.iter().enumerate() {
                let location = frame.location.as_ref().map_or_else(String::new, |location| {
                    format!(" at {}:{}", location.file, location.line.unwrap_or(0))
                });
                let marker = if depth == 0 { "" } else { " (inlined)" };
                println!("{}{location}{marker}", frame.symbol.display_name());
            }
        }
    }

    Ok(())
}

/// Parse command-line text according to the parameter types; trailing
/// variadic arguments use the slice's element type.
fn parse_arguments(ty: &reflex_core::FunctionType, args: &[String]) -> Result<Vec<Value>, Box<dyn std::error::Error>>
{
    let inputs = ty.inputs();
    let mut values = Vec::with_capacity(args.len());
    for (index, raw) in args.iter().enumerate() {
        let parameter = match ty.variadic_element() {
            Some(element) if index + 1 >= inputs.len() => element,
            _ => inputs.get(index).ok_or(ReflexError::LengthMismatch {
                index,
                expected: inputs.len(),
            })?,
        };
        values.push(parse::parse_value(parameter, raw).map_err(|err| format!("argument {index}: {err}"))?);
    }
    Ok(values)
}

fn print_type(ty: &TypeHandle)
{
    println!("{} ({}, {} bytes)", ty.name(), ty.kind().label(), ty.size());
    match ty.kind() {
        TypeKind::Struct { fields } | TypeKind::Union { fields } => {
            for field in fields {
                println!("  {:>4}  {}: {}", field.offset, field.name, field.ty);
            }
        }
        TypeKind::Enum { variants, .. } => {
            for variant in variants {
                match variant.discriminant {
                    Some(value) => println!("  {} = {value}", variant.name),
                    None => println!("  {}", variant.name),
                }
            }
        }
        TypeKind::Array { element, len } => println!("  [{element}; {len}]"),
        TypeKind::Slice { element } => println!("  &[{element}]"),
        TypeKind::Pointer { pointee: Some(pointee) } => println!("  -> {pointee}"),
        _ => {}
    }
    if let Some(record) = ty.runtime_record() {
        let table = if record.in_type_table { "in type table" } else { "outside type table" };
        println!("  runtime record: {} ({table})", record.address);
    }
}
