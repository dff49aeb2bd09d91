/// RTU-over-TCP master demo
///
/// Reads holding registers from a slave behind a serial-to-Ethernet gateway.
///
/// Usage: rtu_tcp_master [host:port] [slave_id] [address] [quantity] [config.json]
///
/// The optional JSON file holds transaction settings, e.g.
/// `{"retries": 5, "trans_delay_ms": 50}`. Set `RUST_LOG=debug` for packet-level
/// output.

use std::net::SocketAddr;
use std::time::Duration;
use modbus_rtu_tunnel::{
    utils::logging::init_tracing, ModbusClient, ModbusRtuMaster, TransactionConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    let mut args = std::env::args().skip(1);
    let server_address = args.next().unwrap_or_else(|| "127.0.0.1:4001".to_string());
    let slave_id: u8 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(1);
    let address: u16 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);
    let quantity: u16 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10);
    let config = match args.next() {
        Some(path) => TransactionConfig::from_json(&std::fs::read_to_string(&path)?)?,
        None => TransactionConfig::default(),
    };

    let socket_address: SocketAddr = server_address.parse()
        .map_err(|e| format!("Invalid gateway address {}: {}", server_address, e))?;

    println!("Modbus RTU over TCP master");
    println!("==========================");
    println!("Gateway: {}  slave: {}  retries: {}", socket_address, slave_id, config.retries);

    let mut client = ModbusRtuMaster::tcp(socket_address.ip(), socket_address.port(), Duration::from_secs(5))
        .with_config(config);

    match client.read_03(slave_id, address, quantity).await {
        Ok(values) => {
            println!("Read holding registers {}..{}:", address, address as u32 + quantity as u32);
            for (i, value) in values.iter().enumerate() {
                println!("  Register {}: {} (0x{:04X})", address as usize + i, value, value);
            }
        }
        Err(e) => eprintln!("Failed to read holding registers: {}", e),
    }

    println!("Last transaction id: {}", client.transaction().transaction_id());
    client.close().await?;
    Ok(())
}
