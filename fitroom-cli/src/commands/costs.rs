use clap::{Args, Subcommand};

use fitroom_core::ledger::{CostLedger, CostStats};

use super::{Globals, format_usd};

#[derive(Args, Debug)]
pub struct CostsArgs {
    #[command(subcommand)]
    pub action: Option<CostsAction>,
}

#[derive(Subcommand, Debug)]
pub enum CostsAction {
    /// Show aggregate statistics (default)
    Stats {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the most recent cost records
    List {
        /// Number of records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete every cost record
    Clear,
}

pub async fn run(args: CostsArgs, globals: &Globals) -> anyhow::Result<()> {
    let config = super::load_config(&globals.config)?;
    let store = super::open_store(&globals.db)?;
    let ledger = CostLedger::with_capacity(store, config.ledger.capacity);

    match args.action.unwrap_or(CostsAction::Stats { json: false }) {
        CostsAction::Stats { json } => {
            let stats = ledger.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        CostsAction::List { limit } => {
            let records = ledger.records().await?;
            if records.is_empty() {
                println!("No cost records.");
            }
            for record in records.iter().rev().take(limit) {
                println!(
                    "  {}  {:<28} {:>8} in {:>8} out  {}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.model,
                    record.input_tokens,
                    record.output_tokens,
                    format_usd(record.cost_usd)
                );
            }
        }
        CostsAction::Clear => {
            let removed = ledger.clear().await?;
            if !globals.quiet {
                println!("Cleared {removed} cost record{}", if removed == 1 { "" } else { "s" });
            }
        }
    }
    Ok(())
}

fn print_stats(stats: &CostStats) {
    println!("  Generations:  {}", stats.total_try_ons);
    println!("  Total cost:   {}", format_usd(stats.total_cost));
    println!("  Average cost: {}", format_usd(stats.avg_cost));
    println!("  Total tokens: {}", stats.total_tokens);
    println!();
    println!("  Last 24h:     {}", format_usd(stats.cost_24h));
    println!("  Last 7d:      {}", format_usd(stats.cost_7d));
    println!("  Last 30d:     {}", format_usd(stats.cost_30d));
    if !stats.cost_by_model.is_empty() {
        println!();
        println!("  By model:");
        for (model, cost) in &stats.cost_by_model {
            println!("    {model:<28} {:>6}  {}", cost.count, format_usd(cost.total_cost));
        }
    }
}
