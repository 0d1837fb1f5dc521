/*
 * Copyright © 2025, United States Government, as represented by the Administrator of
 * the National Aeronautics and Space Administration. All rights reserved.
 *
 * The “ODIN” software is licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License. You may obtain a copy
 * of the License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software distributed under
 * the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
 * either express or implied. See the License for the specific language governing permissions
 * and limitations under the License.
 */
#![allow(unused)]

//! thin binary wiring the `odin_trafikinfo` core to the non-goal HTTP surface of §6/§10.7: an
//! axum router, the admin auth check, static snapshot/icon serving and the `/api/stats`
//! convenience endpoint all live here, calling into the core's typed interfaces. None of this
//! module is part of the grounded, tested core - it is reference wiring only.

mod service;

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use odin_trafikinfo::{build_runtime, load_config};

#[derive(Parser,Debug)]
#[command(name = "odin_trafikinfo_server", about = "Swedish traffic-information aggregator server")]
struct Cli {
    /// path to the trafikinfo.ron configuration file (defaults to ODIN_TRAFIKINFO_CONFIG or configs/trafikinfo.ron)
    #[arg(long)]
    config: Option<PathBuf>,

    /// address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
}

#[tokio::main]
async fn main () -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    println!("starting odin_trafikinfo_server on {}", cli.addr);

    let runtime = build_runtime(config).await?;
    let runtime = Arc::new(runtime);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = runtime.supervisor.clone();
    let supervisor_task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    let router = service::build_router(runtime.clone());
    let listener = tokio::net::TcpListener::bind(&cli.addr).await?;

    let server = axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>());
    tokio::select! {
        result = server => { if let Err(e) = result { tracing::error!("server exited with error: {e}"); } }
        _ = tokio::signal::ctrl_c() => { tracing::info!("shutdown signal received"); }
    }

    let _ = shutdown_tx.send(true);
    let _ = supervisor_task.await;

    Ok(())
}
