//! Command-line access to a docbase SQLite file.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::{Args, Parser, Subcommand};
use docbase::model::{CursorDirection, OrderDirection};
use docbase::{
    Adapter, AdapterOptions, AuthContext, Collection, Cursor, DbError, Document, FindRequest,
    Query, SqliteAdapter,
};
use serde_json::{json, Value as Json};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docbase",
    version,
    about = "Query and load documents stored by the docbase SQLite adapter",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, value_name = "FILE", help = "SQLite database file")]
    db: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE", help = "TOML file with adapter options")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Table namespace (overrides the config file)")]
    namespace: Option<String>,

    #[arg(long, global = true, help = "Active tenant id")]
    tenant: Option<i64>,

    #[arg(long, global = true, help = "Store all tenants in shared tables")]
    shared_tables: bool,

    #[arg(
        long = "role",
        global = true,
        value_name = "ROLE",
        help = "Role held by the caller (repeatable)"
    )]
    roles: Vec<String>,

    #[arg(long, global = true, help = "Skip permission filtering")]
    no_auth: bool,
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[arg(
        long = "query",
        value_name = "JSON",
        help = "Query in {\"method\",\"attribute\",\"values\"} form (repeatable)"
    )]
    queries: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a collection from a JSON schema file.
    Init {
        #[arg(long, value_name = "FILE", help = "Collection definition as JSON")]
        schema: PathBuf,
    },
    /// Create documents from a JSON array or object.
    Insert {
        collection: String,
        #[arg(long, value_name = "FILE", help = "Read documents from FILE instead of stdin")]
        file: Option<PathBuf>,
    },
    /// Print matching documents, one per line.
    Find {
        collection: String,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = docbase::adapter::DEFAULT_LIMIT, help = "Page size")]
        limit: u64,
        #[arg(long, help = "Documents skipped before the page")]
        offset: Option<u64>,
        #[arg(
            long = "order",
            value_name = "ATTR[:desc]",
            help = "Order attribute (repeatable)"
        )]
        orders: Vec<String>,
        #[arg(long, value_name = "TOKEN", conflicts_with = "before", help = "Page after this cursor")]
        after: Option<String>,
        #[arg(long, value_name = "TOKEN", help = "Page before this cursor")]
        before: Option<String>,
    },
    /// Count matching documents.
    Count {
        collection: String,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, help = "Stop counting at this many documents")]
        max: Option<u64>,
    },
    /// Sum a numeric attribute over matching documents.
    Sum {
        collection: String,
        attribute: String,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, help = "Sum at most this many documents")]
        max: Option<u64>,
    },
    /// Fetch one document by id.
    Get {
        collection: String,
        id: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docbase=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    });
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let ctx = auth_context(&cli.open);
    let mut adapter = open_adapter(&cli.open)?;

    match cli.command {
        Command::Init { schema } => {
            let text = fs::read_to_string(&schema)?;
            let collection: Collection = serde_json::from_str(&text)?;
            adapter.create_collection(&ctx, &collection)?;
            emit(&json!({ "created": collection.id }))?;
        }
        Command::Insert { collection, file } => {
            let documents = read_documents(file)?;
            for document in adapter.create_documents(&ctx, &collection, documents)? {
                emit(&document.to_json())?;
            }
        }
        Command::Find {
            collection,
            filter,
            limit,
            offset,
            orders,
            after,
            before,
        } => {
            let mut request = FindRequest::new(parse_queries(&filter)?).limit(Some(limit));
            if let Some(offset) = offset {
                request = request.offset(offset);
            }
            for order in &orders {
                let (attribute, direction) = parse_order(order)?;
                request = request.order(attribute, direction);
            }
            if let Some(token) = after {
                request = request.cursor(Cursor::decode(&token)?, CursorDirection::After);
            } else if let Some(token) = before {
                request = request.cursor(Cursor::decode(&token)?, CursorDirection::Before);
            }
            let documents = adapter.find(&ctx, &collection, &request)?;
            for document in &documents {
                emit(&document.to_json())?;
            }
            let boundary = match request.cursor_direction {
                CursorDirection::After => documents.last(),
                CursorDirection::Before => documents.first(),
            };
            if let Some(document) = boundary.filter(|_| documents.len() as u64 == limit) {
                let cursor = Cursor::from_document(document, &request.order_attributes)?;
                emit(&json!({ "cursor": cursor.encode() }))?;
            }
        }
        Command::Count {
            collection,
            filter,
            max,
        } => {
            let count = adapter.count(&ctx, &collection, &parse_queries(&filter)?, max)?;
            emit(&json!({ "count": count }))?;
        }
        Command::Sum {
            collection,
            attribute,
            filter,
            max,
        } => {
            let sum = adapter.sum(&ctx, &collection, &attribute, &parse_queries(&filter)?, max)?;
            emit(&json!({ "sum": sum }))?;
        }
        Command::Get {
            collection,
            id,
            filter,
        } => match adapter.get_document(&ctx, &collection, &id, &parse_queries(&filter)?)? {
            Some(document) => emit(&document.to_json())?,
            None => return Err(DbError::not_found(format!("document '{id}' not found")).into()),
        },
    }
    Ok(())
}

fn auth_context(open: &OpenArgs) -> AuthContext {
    let ctx = if open.roles.is_empty() {
        AuthContext::default()
    } else {
        AuthContext::new(open.roles.iter().cloned())
    };
    let ctx = ctx.with_tenant(open.tenant);
    if open.no_auth {
        ctx.skip_authorization()
    } else {
        ctx
    }
}

fn open_adapter(open: &OpenArgs) -> Result<SqliteAdapter, Box<dyn Error>> {
    let mut options = match &open.config {
        Some(path) => AdapterOptions::load(path)?,
        None => AdapterOptions::default(),
    };
    if let Some(namespace) = &open.namespace {
        options.namespace = namespace.clone();
    }
    if open.shared_tables {
        options.shared_tables = true;
    }
    options.validate()?;
    let db = open.db.as_ref().ok_or("--db is required")?;
    debug!(path = %db.display(), namespace = %options.namespace, "opening database");
    Ok(SqliteAdapter::open(db, options)?)
}

fn read_documents(file: Option<PathBuf>) -> Result<Vec<Document>, Box<dyn Error>> {
    let text = match file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let json: Json = serde_json::from_str(&text)?;
    let documents: Vec<Document> = match &json {
        Json::Array(items) => items.iter().map(Document::from_json).collect::<Result<_, _>>()?,
        single => vec![Document::from_json(single)?],
    };
    Ok(documents)
}

fn parse_queries(filter: &FilterArgs) -> Result<Vec<Query>, DbError> {
    filter.queries.iter().map(|q| Query::parse(q)).collect()
}

fn parse_order(order: &str) -> Result<(String, OrderDirection), DbError> {
    let (attribute, direction) = match order.split_once(':') {
        Some((attribute, direction)) => (attribute, direction),
        None => (order, "asc"),
    };
    let direction = match direction.to_ascii_lowercase().as_str() {
        "asc" => OrderDirection::Asc,
        "desc" => OrderDirection::Desc,
        other => {
            return Err(DbError::invalid_query(format!(
                "unknown order direction '{other}'"
            )))
        }
    };
    Ok((attribute.to_string(), direction))
}

fn emit(value: &Json) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
