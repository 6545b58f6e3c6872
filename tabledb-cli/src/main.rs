use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tabledb::table::SnapshotHeader;
use tabledb::{parse_mapping, DBSchema, DBTable, Registry, SqliteConnection};

#[derive(Parser)]
#[command(name = "tabledb", version, about = "TableDB schema and snapshot tool")]
struct Cli {
    /// Path to the YAML mapping file
    #[arg(long, global = true, default_value = "mapping.yaml")]
    mapping: PathBuf,

    /// Output format
    #[arg(long, global = true, default_value = "yaml")]
    format: OutputFormat,

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
    /// Print the DDL for every generated table
    Ddl,

    /// List generated tables with their columns, indexes and foreign keys
    Tables,

    /// Execute the DDL against a SQLite database file
    Create {
        /// SQLite database file
        #[arg(long)]
        database: PathBuf,
    },

    /// Load a table from the database and write it to a snapshot file
    Dump {
        /// Table name
        table: String,
        /// Snapshot file to write
        file: PathBuf,
        /// SQLite database file
        #[arg(long)]
        database: PathBuf,
    },

    /// Show the header of a snapshot file
    Inspect {
        /// Snapshot file
        file: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Command::Ddl => {
            let schema = generate(&cli.mapping)?;
            for statement in schema.format_ddl() {
                println!("{statement};");
            }
        }

        Command::Tables => {
            let schema = generate(&cli.mapping)?;
            let tables: Vec<_> = schema.tables().iter().map(|t| describe(t)).collect();
            print_output(&json!({ "schema": schema.name(), "tables": tables }), &cli.format)?;
        }

        Command::Create { database } => {
            let schema = generate(&cli.mapping)?;
            schema.set_connection(Arc::new(SqliteConnection::open(database)?));
            schema.create_database()?;
            print_output(
                &json!({ "ok": true, "database": database.display().to_string() }),
                &cli.format,
            )?;
        }

        Command::Dump {
            table,
            file,
            database,
        } => {
            let schema = generate(&cli.mapping)?;
            schema.set_connection(Arc::new(SqliteConnection::open(database)?));
            let table = schema.table_or_err(table)?;
            table.load_all()?;
            let rows = table.save_file(file)?;
            print_output(
                &json!({
                    "ok": true,
                    "table": table.name(),
                    "rows": rows,
                    "file": file.display().to_string(),
                }),
                &cli.format,
            )?;
        }

        Command::Inspect { file } => {
            let header = SnapshotHeader::read_file(file)?;
            print_output(&serde_json::to_value(&header)?, &cli.format)?;
        }
    }

    Ok(())
}

/// Read the mapping file and generate every registered type into a fresh schema.
fn generate(mapping: &Path) -> Result<Arc<DBSchema>, Box<dyn std::error::Error>> {
    let file = parse_mapping(mapping)?;
    let registry = Registry::from_mapping(&file);
    let schema = DBSchema::with_config(file.schema.clone());
    let tables = registry.generate_all(&schema)?;
    log::info!("Generated {} types into schema '{}'", tables.len(), schema.name());
    Ok(schema)
}

fn describe(table: &DBTable) -> serde_json::Value {
    let columns: Vec<_> = table
        .columns()
        .iter()
        .map(|c| {
            json!({
                "name": c.name(),
                "type": c.data_type(),
                "keys": c.keys(),
                "reference": c.reference_table(),
            })
        })
        .collect();
    let indexes: Vec<_> = table
        .indexes()
        .iter()
        .map(|i| json!({ "name": i.name, "unique": i.unique, "columns": i.columns }))
        .collect();
    let foreign_keys: Vec<_> = table
        .foreign_keys()
        .iter()
        .map(|fk| {
            json!({
                "name": fk.name,
                "column": fk.column,
                "references": format!("{}.{}", fk.reference_table, fk.reference_column),
            })
        })
        .collect();
    json!({
        "name": table.name(),
        "kind": format!("{:?}", table.kind()),
        "base": table.base().map(|b| b.name().to_string()),
        "log_table": table.log_table_name(),
        "columns": columns,
        "indexes": indexes,
        "foreign_keys": foreign_keys,
    })
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
