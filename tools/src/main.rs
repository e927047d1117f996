//! offertrail: headless dataset builder.
//!
//! Usage:
//!   offertrail --data-dir ./data --out dataset.jsonl
//!   offertrail --data-dir ./data --reference-date 2018-07-26 --on-orphan drop
//!   offertrail --data-dir ./data --clear-cache --db ./cache.db
//!   offertrail --data-dir ./data --no-cache          (dataset to stdout)

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use offertrail_core::{
    cache::{ExpirationCache, MemoryCache},
    config::{OrphanPolicy, PipelineConfig},
    jsonl,
    pipeline::{BuildOutcome, DatasetBuilder},
    store::PipelineStore,
};
use std::env;
use std::io::{self, Write};
use std::path::Path;

/// Command-line flags, parsed before any source is touched.
#[derive(Debug)]
struct CliArgs {
    data_dir:       String,
    out:            Option<String>,
    db:             Option<String>,
    reference_date: Option<NaiveDate>,
    orphan_policy:  Option<OrphanPolicy>,
    no_cache:       bool,
    clear_cache:    bool,
    history:        bool,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let has = |flag: &str| args.iter().any(|a| a == flag);
        let no_cache = has("--no-cache");
        let clear_cache = has("--clear-cache");
        let history = has("--history");

        if no_cache && (clear_cache || history) {
            bail!("--no-cache cannot be combined with --clear-cache or --history, both need the cache database");
        }

        let reference_date = flag_value(args, "--reference-date")
            .map(|date| {
                NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .with_context(|| format!("--reference-date expects YYYY-MM-DD, got '{date}'"))
            })
            .transpose()?;
        let orphan_policy = flag_value(args, "--on-orphan")
            .map(str::parse::<OrphanPolicy>)
            .transpose()?;

        Ok(Self {
            data_dir: flag_value(args, "--data-dir").unwrap_or("./data").to_string(),
            out: flag_value(args, "--out").map(str::to_string),
            db: flag_value(args, "--db").map(str::to_string),
            reference_date,
            orphan_policy,
            no_cache,
            clear_cache,
            history,
        })
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let cli = CliArgs::parse(&args)?;
    let data_dir = cli.data_dir.as_str();
    let out = cli.out.as_deref();
    let no_cache = cli.no_cache;

    let mut config = PipelineConfig::load(data_dir)?;
    if let Some(db) = &cli.db {
        config.cache_db_path = db.into();
    }
    if let Some(date) = cli.reference_date {
        config.reference_date = Some(date);
    }
    if let Some(policy) = cli.orphan_policy {
        config.orphan_policy = policy;
    }

    let db = config.cache_db_path.to_string_lossy().into_owned();
    let quiet = out.is_none();
    if !quiet {
        println!("offertrail: dataset builder");
        println!("  data_dir:   {data_dir}");
        println!("  cache db:   {}", if no_cache { "(disabled)" } else { db.as_str() });
        println!("  reference:  {}", config.reference_date.map_or("today".to_string(), |d| d.to_string()));
        println!("  orphans:    {:?}", config.orphan_policy);
        println!();
    }

    let builder = DatasetBuilder::new(config);

    if no_cache {
        let mut cache = MemoryCache::new();
        let outcome = builder.build(&mut cache)?;
        emit(&outcome, out)?;
        if !quiet {
            print_summary(&outcome);
        }
        return Ok(());
    }

    let mut store = PipelineStore::open(&db)?;
    store.migrate()?;

    if cli.history {
        print_history(&store)?;
        return Ok(());
    }
    if cli.clear_cache {
        store.clear()?;
        log::info!("Expiration cache cleared");
    }

    let outcome = builder.build(&mut store)?;
    builder.record(&store, &outcome, env!("CARGO_PKG_VERSION"))?;
    emit(&outcome, out)?;
    if !quiet {
        print_summary(&outcome);
    }
    Ok(())
}

fn emit(outcome: &BuildOutcome, out: Option<&str>) -> Result<()> {
    match out {
        Some(path) => jsonl::write_records(Path::new(path), &outcome.rows)?,
        None => {
            let stdout = io::stdout();
            let mut handle = io::BufWriter::new(stdout.lock());
            jsonl::write_records_to(&mut handle, &outcome.rows)?;
            handle.flush()?;
        }
    }
    Ok(())
}

fn print_summary(outcome: &BuildOutcome) {
    let c = &outcome.correlation;
    let a = &outcome.assembly;
    println!("=== BUILD SUMMARY ===");
    println!("  run_id:          {}", outcome.run_id);
    println!("  reference date:  {}", outcome.reference_date);
    println!("  events read:     {}", c.events_read);
    println!("  transactions:    {}", c.transactions_discarded);
    println!("  duplicates:      {}", c.duplicates_removed);
    println!("  offer events:    {}", c.offer_events);
    println!("  orphans dropped: {}", c.orphans_dropped);
    println!("  cache:           {}", if c.cache_hit { "hit" } else { "miss" });
    println!("  instances:       {}", c.instances);
    println!("  no profile:      {}", a.dropped_no_user);
    println!("  no offer:        {}", a.dropped_no_offer);
    println!("  rows written:    {}", a.rows);
}

fn print_history(store: &PipelineStore) -> Result<()> {
    let runs = store.build_runs()?;
    println!("=== BUILD HISTORY ===");
    if runs.is_empty() {
        println!("  (No builds recorded yet)");
    }
    for r in &runs {
        println!(
            "  {} | {} | ref {} | {} rows | cache {} | dropped {}/{}",
            r.started_at,
            r.run_id,
            r.reference_date,
            r.rows_written,
            if r.cache_hit { "hit" } else { "miss" },
            r.dropped_no_user,
            r.dropped_no_offer
        );
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
