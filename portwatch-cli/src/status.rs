use crate::client::IpcClient;

pub(crate) async fn execute(client: &mut IpcClient, json: bool) -> anyhow::Result<()> {
    let status = client.status().await?;

    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    println!("Daemon Status");
    println!("════════════════════════════════════════");
    println!("  Running:    {}", status.running);
    println!("  Uptime:     {}", status.uptime);
    println!("  Start Time: {}", status.start_time);
    println!("  Version:    {}", status.version);
    println!("  Data Dir:   {}", status.data_dir);
    println!("  Retention:  {} days", status.retention_days);
    println!("  Socket:     {}", status.socket_path);
    println!("  Ports:      {:?}", status.monitored_ports);
    for info in &status.port_infos {
        if !info.description.is_empty() {
            println!("    {}: {}", info.port, info.description);
        }
    }

    Ok(())
}
