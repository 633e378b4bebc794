use super::args::{attribute_map, filter_map};
use super::render;
use super::setup::{Cli, Commands};
use anyhow::{bail, Context, Result};
use clap::Parser;
use crelish::init::initialize;
use crelish::{Crelish, CrelishError, FilterSpec, QuerySettings, Record, SortSpec};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let crelish = initialize(&cwd, cli.config.clone()).context("could not open the content root")?;
    debug!(?crelish, "site opened");

    match cli.command {
        Commands::List {
            ctype,
            filters,
            search,
            sort,
            page,
            page_size,
            raw,
        } => handle_list(&crelish, &ctype, &filters, search.as_deref(), sort.as_deref(), page, page_size, raw),
        Commands::Get { ctype, uuid } => handle_get(&crelish, &ctype, &uuid),
        Commands::Save {
            ctype,
            uuid,
            stdin,
            values,
        } => handle_save(&crelish, &ctype, uuid.as_deref(), stdin, &values),
        Commands::Delete { ctype, uuid } => handle_delete(&crelish, &ctype, &uuid),
        Commands::Columns { ctype } => render::print_json(&crelish.data(&ctype)?.columns()),
        Commands::Flush { ctype } => handle_flush(&crelish, ctype.as_deref()),
        Commands::Resolve { ctype } => render::print_json(&crelish.resolver().resolve(&ctype)?),
        Commands::Slug { slug } => match crelish.resolve_slug(&slug)? {
            Some(target) => render::print_json(&target),
            None => bail!("no record owns the slug '{}'", slug),
        },
    }
}

/// Logs go to stderr. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crelish={level},crelish_cli={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[allow(clippy::too_many_arguments)]
fn handle_list(
    crelish: &Crelish,
    ctype: &str,
    filters: &[String],
    search: Option<&str>,
    sort: Option<&str>,
    page: usize,
    page_size: Option<usize>,
    raw: bool,
) -> Result<()> {
    let filter = FilterSpec::from_map(&filter_map(filters, search)?)?;
    let mut settings = QuerySettings::new().filter(filter).page(page.max(1));
    if let Some(sort) = sort {
        settings = settings.sort(SortSpec::parse_str(sort));
    }
    if let Some(size) = page_size {
        settings = settings.page_size(size);
    }

    let data = crelish.data(ctype)?.settings(settings);
    if raw {
        render::print_json(&data.raw_all()?)
    } else {
        let page = data.all()?.map(Record::into_value);
        render::print_json(&page)
    }
}

fn handle_get(crelish: &Crelish, ctype: &str, uuid: &str) -> Result<()> {
    match crelish.data(ctype)?.uuid(uuid).one()? {
        Some(record) => render::print_json(&record.into_value()),
        None => bail!("{}/{} not found", ctype, uuid),
    }
}

fn handle_save(crelish: &Crelish, ctype: &str, uuid: Option<&str>, stdin: bool, values: &[String]) -> Result<()> {
    let mut attributes = if stdin { read_stdin_object()? } else { Map::new() };
    attributes.extend(attribute_map(values)?);
    if attributes.is_empty() && uuid.is_none() {
        bail!("nothing to save: pass key=value pairs or --stdin");
    }

    let mut model = match uuid {
        Some(uuid) => match crelish.load_model(ctype, uuid)? {
            Some(model) => model,
            None => bail!("{}/{} not found", ctype, uuid),
        },
        None => crelish.model(ctype)?,
    };
    let created = model.is_new();
    model.set_attributes(attributes);

    match model.try_save() {
        Ok(record) => {
            let verb = if created { "Created" } else { "Updated" };
            render::success(&format!("{} {}/{}", verb, ctype, record.uuid().unwrap_or_default()));
            Ok(())
        }
        Err(CrelishError::Validation(errors)) => {
            render::validation_errors(&errors);
            bail!("{} was not saved", ctype)
        }
        Err(e) => Err(e.into()),
    }
}

fn handle_delete(crelish: &Crelish, ctype: &str, uuid: &str) -> Result<()> {
    if crelish.data(ctype)?.uuid(uuid).delete()? {
        render::success(&format!("Deleted {}/{}", ctype, uuid));
        Ok(())
    } else {
        bail!("{}/{} not found", ctype, uuid)
    }
}

fn handle_flush(crelish: &Crelish, ctype: Option<&str>) -> Result<()> {
    match ctype {
        Some(ctype) => {
            crelish.flush_cache(ctype);
            render::success(&format!("Flushed cache for {}", ctype));
        }
        None => {
            crelish.flush_all_caches()?;
            render::success("Flushed all caches");
        }
    }
    Ok(())
}

fn read_stdin_object() -> Result<Map<String, Value>> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    match serde_json::from_str::<Value>(&input).context("stdin is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("stdin must hold a JSON object, got {}", other),
    }
}
