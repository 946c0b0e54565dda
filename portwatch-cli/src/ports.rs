use serde_json::json;

use crate::client::IpcClient;

pub(crate) async fn execute_list(client: &mut IpcClient, json: bool) -> anyhow::Result<()> {
    let ports = client.list_ports().await?;

    if json {
        println!("{}", json!({ "ports": ports }));
        return Ok(());
    }

    if ports.is_empty() {
        println!("No ports being monitored");
        return Ok(());
    }

    println!("Monitored ports:");
    for port in ports {
        println!("  - {port}");
    }
    Ok(())
}

pub(crate) async fn execute_add(client: &mut IpcClient, port: u16) -> anyhow::Result<()> {
    client.add_port(port).await?;
    println!("Port {port} added to monitoring");
    Ok(())
}

pub(crate) async fn execute_remove(client: &mut IpcClient, port: u16) -> anyhow::Result<()> {
    client.remove_port(port).await?;
    println!("Port {port} removed from monitoring");
    Ok(())
}

pub(crate) async fn execute_flush(client: &mut IpcClient) -> anyhow::Result<()> {
    client.flush_stats().await?;
    println!("Stats flushed to database");
    Ok(())
}
