use clap::{Parser, Subcommand, ValueEnum};
use jsondb::{CollectionConfig, Filter, Store, StoreConfig};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process;

/// jsondb CLI: inspect and edit a jsondb data directory from the command line
#[derive(Parser)]
#[command(name = "jsondb", version, about)]
struct Cli {
    /// Path to the data directory (default: current directory)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Store config file (default: <data-dir>/jsondb.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
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
    /// Insert a record (or several, when --json is an array)
    Insert {
        /// Collection name
        collection: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Whole record as JSON; an array inserts every element
        #[arg(long, conflicts_with = "fields")]
        json: Option<String>,
    },

    /// Show the first matching record
    Find {
        /// Collection name
        collection: String,
        /// Field filters (e.g. --where status=published)
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// List matching records
    List {
        /// Collection name
        collection: String,
        /// Field filters (e.g. --where status=published)
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Leave out soft-deleted records
        #[arg(long)]
        live: bool,
    },

    /// Merge fields into matching records
    Update {
        /// Collection name
        collection: String,
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Field values to set (e.g. --field status=published)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Update every match instead of the first
        #[arg(long)]
        all: bool,
    },

    /// Delete matching records
    Remove {
        /// Collection name
        collection: String,
        #[arg(long = "where", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
        /// Remove every match instead of the first
        #[arg(long)]
        all: bool,
        /// Excise records instead of marking them deleted
        #[arg(long)]
        physical: bool,
    },

    /// Show collections, row counts and delete policy
    Status,

    /// Copy a collection file somewhere else
    Backup {
        /// Collection name
        collection: String,
        /// Destination file
        destination: PathBuf,
    },

    /// Delete a collection's file
    Drop {
        /// Collection name
        collection: String,
    },
}

impl Command {
    fn collection(&self) -> Option<&str> {
        match self {
            Command::Insert { collection, .. }
            | Command::Find { collection, .. }
            | Command::List { collection, .. }
            | Command::Update { collection, .. }
            | Command::Remove { collection, .. }
            | Command::Backup { collection, .. }
            | Command::Drop { collection } => Some(collection),
            Command::Status => None,
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Machine-readable error on stderr
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    let mut store = Store::open(config).await?;

    match cli.command {
        Command::Insert {
            collection,
            fields,
            json,
        } => {
            let col = store.collection(&collection)?;
            let inserted = match json {
                Some(raw) => match serde_json::from_str::<Value>(&raw)? {
                    Value::Array(values) => Value::Array(col.insert_many(values).await?),
                    value => col.insert(value).await?,
                },
                None => col.insert(fields_to_value(&fields)).await?,
            };
            print_output(&inserted, &cli.format)?;
        }

        Command::Find {
            collection,
            filters,
        } => {
            let col = store.collection(&collection)?;
            let found = col.find(fields_to_filter(&filters)).map(Value::Object);
            print_output(&found.unwrap_or(Value::Null), &cli.format)?;
        }

        Command::List {
            collection,
            filters,
            live,
        } => {
            let col = store.collection(&collection)?;
            let mut filter = fields_to_map(&filters);
            if live {
                filter.insert("isDelete".to_string(), Value::Bool(false));
            }
            let rows = col.find_all(Filter::Fields(filter));
            print_output(&rows_to_value(rows), &cli.format)?;
        }

        Command::Update {
            collection,
            filters,
            fields,
            all,
        } => {
            let col = store.collection(&collection)?;
            let filter = fields_to_filter(&filters);
            let patch = fields_to_value(&fields);
            let updated = if all {
                rows_to_value(col.update_all(filter, patch).await?)
            } else {
                col.update(filter, patch).await?.map(Value::Object).unwrap_or(Value::Null)
            };
            print_output(&updated, &cli.format)?;
        }

        Command::Remove {
            collection,
            filters,
            all,
            physical,
        } => {
            let col = store.collection(&collection)?;
            let filter = fields_to_filter(&filters);
            let removed = if all {
                rows_to_value(col.remove_all(filter, physical).await?)
            } else {
                col.remove(filter, physical).await?.map(Value::Object).unwrap_or(Value::Null)
            };
            print_output(&removed, &cli.format)?;
        }

        Command::Status => {
            print_output(&store.status(), &cli.format)?;
        }

        Command::Backup {
            collection,
            destination,
        } => {
            store.backup(&collection, &destination).await?;
            print_output(
                &serde_json::json!({ "ok": true, "backup": destination.display().to_string() }),
                &cli.format,
            )?;
        }

        Command::Drop { collection } => {
            store.drop_collection(&collection).await?;
            print_output(&serde_json::json!({ "ok": true, "dropped": collection }), &cli.format)?;
        }
    }

    store.flush_all().await?;
    Ok(())
}

/// Use the config file when there is one; otherwise declare the collection
/// named on the command line with default settings.
fn load_config(cli: &Cli) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    let explicit = cli.config.is_some();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("jsondb.yaml"));

    if explicit || path.exists() {
        log::debug!("Loading config from {}", path.display());
        return Ok(StoreConfig::from_yaml_file(&path)?);
    }

    let mut config = StoreConfig::new(cli.data_dir.clone());
    if let Some(name) = cli.command.collection() {
        config = config.collection(CollectionConfig::new(name));
    }
    Ok(config)
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}

fn fields_to_map(fields: &[(String, String)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, val) in fields {
        // Try to parse as JSON value (for numbers, booleans, arrays, objects)
        let json_val = serde_json::from_str(val).unwrap_or(Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    map
}

fn fields_to_value(fields: &[(String, String)]) -> Value {
    Value::Object(fields_to_map(fields))
}

fn fields_to_filter(filters: &[(String, String)]) -> Filter {
    Filter::Fields(fields_to_map(filters))
}

fn rows_to_value(rows: Vec<jsondb::Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}
