use clap::{Parser, Subcommand, ValueEnum};
use datashape::{
    MemoryTypeModel, ScopeFilter, ScopeNode, SchemaCompiler, SchemaNode, SchemaSource,
    SchemaValidator, TransformerRegistry, YamlSchemaDir,
};
use std::path::PathBuf;
use std::process;

/// datashape CLI — validate and inspect projection schemas from the command line
#[derive(Parser)]
#[command(name = "datashape", version, about)]
struct Cli {
    /// Directory containing schema documents
    #[arg(long, default_value = ".")]
    schema_dir: PathBuf,

    /// Type-model YAML describing the persisted types
    #[arg(long)]
    model: PathBuf,

    /// Maximum nesting depth
    #[arg(long, default_value_t = 3)]
    depth: i32,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Granted roles (repeatable)
    #[arg(long = "role")]
    roles: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Validate one schema document, or every document in the schema directory
    Validate {
        /// Schema file path relative to the schema directory
        path: Option<String>,
    },

    /// Print a scope skeleton listing every visible property of a schema
    Scope {
        /// Schema file path relative to the schema directory
        schema: String,
    },

    /// Print the compiled schema tree
    Show {
        /// Schema file path relative to the schema directory
        schema: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let model = match MemoryTypeModel::from_yaml_file(&cli.model) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("Error loading type model: {e}");
            process::exit(1);
        }
    };
    let source = YamlSchemaDir::new(&cli.schema_dir);

    let result = match &cli.command {
        Command::Validate { path } => run_validate(&cli, &model, &source, path.as_deref()),
        Command::Scope { schema } => run_scope(&cli, &model, &source, schema),
        Command::Show { schema } => run_show(&cli, &model, &source, schema),
    };

    if let Err(message) = result {
        eprintln!("Error: {message}");
        process::exit(1);
    }
}

fn run_validate(
    cli: &Cli,
    model: &MemoryTypeModel,
    source: &YamlSchemaDir,
    path: Option<&str>,
) -> Result<(), String> {
    let registry = TransformerRegistry::with_builtins();
    let compiler = SchemaCompiler::new(source, model);
    let validator = SchemaValidator::new(model, &registry, source);

    println!("datashape validator");
    println!("===================");
    println!();

    let names = match path {
        Some(path) => vec![path.to_string()],
        None => source.list().map_err(|e| e.to_string())?,
    };

    if names.is_empty() {
        println!("No schema files found in {}", cli.schema_dir.display());
        return Ok(());
    }

    let mut errors = 0usize;
    for name in &names {
        let outcome = compiler
            .compile_named(name, cli.depth)
            .and_then(|node| validator.validate(&node, cli.depth));
        match outcome {
            Ok(()) => println!("OK    {name}"),
            Err(e) => {
                errors += 1;
                println!("FAIL  {name}");
                println!("      {e}");
            }
        }
    }

    println!();
    if errors > 0 {
        Err(format!("{errors} of {} schema file(s) failed", names.len()))
    } else {
        println!("Validation successful ({} file(s))", names.len());
        Ok(())
    }
}

fn run_scope(
    cli: &Cli,
    model: &MemoryTypeModel,
    source: &YamlSchemaDir,
    schema: &str,
) -> Result<(), String> {
    let node = compile_filtered(cli, model, source, schema)?;
    let skeleton = scope_skeleton(&node);
    print_yaml_or_json(cli, &skeleton.to_yaml_value())
}

fn run_show(
    cli: &Cli,
    model: &MemoryTypeModel,
    source: &YamlSchemaDir,
    schema: &str,
) -> Result<(), String> {
    let node = compile_filtered(cli, model, source, schema)?;
    let value = serde_yaml::to_value(&node).map_err(|e| e.to_string())?;
    print_yaml_or_json(cli, &value)
}

fn compile_filtered(
    cli: &Cli,
    model: &MemoryTypeModel,
    source: &YamlSchemaDir,
    schema: &str,
) -> Result<SchemaNode, String> {
    let compiler = SchemaCompiler::new(source, model);
    let node = compiler
        .compile_named(schema, cli.depth)
        .map_err(|e| e.to_string())?;

    if cli.roles.is_empty() {
        return Ok(node);
    }

    let filter = ScopeFilter::new(model, &cli.roles);
    filter.filter(&node, None, cli.depth).map_err(|e| e.to_string())
}

/// Every visible property of the compiled tree, as a scope document a
/// caller could send back verbatim.
fn scope_skeleton(node: &SchemaNode) -> ScopeNode {
    let mut scope = ScopeNode::new();
    for property in &node.properties {
        if property.hidden {
            continue;
        }
        match &property.nested {
            Some(nested) => scope.insert(&property.name, Some(scope_skeleton(nested))),
            None => scope.insert_leaf(&property.name),
        }
    }
    scope
}

fn print_yaml_or_json(cli: &Cli, value: &serde_yaml::Value) -> Result<(), String> {
    match cli.format {
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(value).map_err(|e| e.to_string())?;
            println!("{yaml}");
        }
        OutputFormat::Json => {
            let json = serde_json::to_value(value).map_err(|e| e.to_string())?;
            let pretty = serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?;
            println!("{pretty}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
