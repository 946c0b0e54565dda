use chrono::Local;
use clap::Args;

use portwatch_api::dates;

use crate::client::IpcClient;
use crate::format::format_bytes;

#[derive(Args, Debug)]
pub(crate) struct StatsArgs {
    /// Port to query.
    #[clap(short, long)]
    pub(crate) port: u16,

    /// Output in JSON format.
    #[clap(long)]
    pub(crate) json: bool,

    /// Show today's stats.
    #[clap(long)]
    pub(crate) today: bool,

    /// Show yesterday's stats.
    #[clap(long)]
    pub(crate) yesterday: bool,

    /// Show this month's stats.
    #[clap(long)]
    pub(crate) this_month: bool,

    /// Show the last 7 days.
    #[clap(long)]
    pub(crate) last_7_days: bool,

    /// Show the last 30 days.
    #[clap(long)]
    pub(crate) last_30_days: bool,

    /// Billing cycle day of month (1-28).
    #[clap(long)]
    pub(crate) cycle_day: Option<u32>,

    /// Start date (YYYY-MM-DD); requires --to.
    #[clap(long)]
    pub(crate) from: Option<String>,

    /// End date (YYYY-MM-DD); requires --from.
    #[clap(long)]
    pub(crate) to: Option<String>,
}

impl StatsArgs {
    /// Resolve the selected preset into a date range, or None for realtime.
    fn date_range(&self) -> Option<(String, String)> {
        let now = Local::now().naive_local();
        let range = if self.today {
            dates::today(now)
        } else if self.yesterday {
            dates::yesterday(now)
        } else if self.this_month {
            dates::this_month(now)
        } else if self.last_7_days {
            dates::last_n_days(7, now)
        } else if self.last_30_days {
            dates::last_n_days(30, now)
        } else if let Some(day) = self.cycle_day {
            dates::billing_cycle(day, now)
        } else if let (Some(from), Some(to)) = (&self.from, &self.to) {
            return Some((from.clone(), to.clone()));
        } else {
            return None;
        };
        let (start, end) = dates::format_range(range.0, range.1);
        Some((start, end))
    }
}

pub(crate) async fn execute(client: &mut IpcClient, args: &StatsArgs) -> anyhow::Result<()> {
    let Some((start_date, end_date)) = args.date_range() else {
        return realtime(client, args).await;
    };

    let stats = client
        .historical_stats(args.port, start_date.clone(), end_date.clone())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
        return Ok(());
    }

    println!("Port {} - Historical Statistics", args.port);
    println!("Period: {start_date} to {end_date}");
    println!("════════════════════════════════════════");
    println!("  Total RX:    {}", format_bytes(stats.total_rx));
    println!("  Total TX:    {}", format_bytes(stats.total_tx));
    println!("  Total:       {}", format_bytes(stats.total_bytes));
    println!("  Peak RX:     {}/s", format_bytes(stats.peak_rx_rate));
    println!("  Peak TX:     {}/s", format_bytes(stats.peak_tx_rate));

    if !stats.daily_stats.is_empty() {
        println!();
        println!("Daily Breakdown:");
        println!("  {:<12}  {:>12}  {:>12}  {:>12}", "Date", "RX", "TX", "Total");
        println!(
            "  {:<12}  {:>12}  {:>12}  {:>12}",
            "────────────", "────────────", "────────────", "────────────"
        );
        for day in &stats.daily_stats {
            println!(
                "  {:<12}  {:>12}  {:>12}  {:>12}",
                day.date,
                format_bytes(day.rx_bytes),
                format_bytes(day.tx_bytes),
                format_bytes(day.rx_bytes + day.tx_bytes)
            );
        }
    }

    Ok(())
}

async fn realtime(client: &mut IpcClient, args: &StatsArgs) -> anyhow::Result<()> {
    let stats = client.realtime_stats(args.port).await?;

    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
        return Ok(());
    }

    println!("Port {} - Realtime Statistics", args.port);
    println!("════════════════════════════════════════");
    println!(
        "  RX Bytes:    {} ({}/s)",
        format_bytes(stats.rx_bytes),
        format_bytes(stats.rx_rate as u64)
    );
    println!(
        "  TX Bytes:    {} ({}/s)",
        format_bytes(stats.tx_bytes),
        format_bytes(stats.tx_rate as u64)
    );
    println!("  Total:       {}", format_bytes(stats.rx_bytes + stats.tx_bytes));
    println!("  RX Packets:  {}", stats.rx_packets);
    println!("  TX Packets:  {}", stats.tx_packets);
    println!("  Connections: {}", stats.connections);

    Ok(())
}
