//! Diagnostics command - displays system and Docker information

use anyhow::Result;
use bollard::Docker;
use sysinfo::System;

/// Run diagnostics and display system information
pub async fn run() -> Result<()> {
    println!("Podlike Diagnostics");
    println!("===================\n");

    // System information
    println!("System Information:");
    println!("-------------------");

    let mut sys = System::new_all();
    sys.refresh_all();

    println!(
        "  OS: {} {}",
        System::name().unwrap_or_default(),
        System::os_version().unwrap_or_default()
    );
    println!("  Kernel: {}", System::kernel_version().unwrap_or_default());
    println!("  Hostname: {}", System::host_name().unwrap_or_default());
    println!("  CPUs: {}", sys.cpus().len());
    println!("  Total Memory: {} MB", sys.total_memory() / 1024 / 1024);

    // Docker information
    println!("\nDocker Information:");
    println!("-------------------");

    match Docker::connect_with_local_defaults() {
        Ok(docker) => {
            match docker.version().await {
                Ok(version) => {
                    println!("  Version: {}", version.version.unwrap_or_default());
                    println!("  API Version: {}", version.api_version.unwrap_or_default());
                    println!(
                        "  OS/Arch: {}/{}",
                        version.os.unwrap_or_default(),
                        version.arch.unwrap_or_default()
                    );
                }
                Err(e) => {
                    println!("  Error getting version: {}", e);
                }
            }

            match docker.info().await {
                Ok(info) => {
                    println!("  Containers: {}", info.containers.unwrap_or(0));
                    println!("    Running: {}", info.containers_running.unwrap_or(0));
                    println!("  Images: {}", info.images.unwrap_or(0));
                    println!("  Storage Driver: {}", info.driver.unwrap_or_default());
                }
                Err(e) => {
                    println!("  Error getting info: {}", e);
                }
            }
        }
        Err(e) => {
            println!("  Error connecting to Docker: {}", e);
        }
    }

    // Supervisor container discovery
    println!("\nContainer Environment:");
    println!("----------------------");

    match podlike::engine::Client::connect().await {
        Ok(client) => {
            println!("  Container ID: {}", client.container_id());
            println!("  Container Name: {}", client.container_name());
            println!("  Cgroup: {}", client.cgroup());
            println!("  Labels: {}", client.labels().len());
        }
        Err(e) => {
            println!("  Not usable as a supervisor: {}", e);
        }
    }

    Ok(())
}
