// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use dbnet_client_rs::{
    catalog::VariableCatalog,
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    client::session::Session,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("config/logger.yaml")?;

    let cfg = resolve_config_path("config/dbnet.yaml").and_then(Config::load_from_file).context("failed to resolve or load config")?;

    let cancel = CancellationToken::new();
    let session = Arc::new(Session::connect(&cfg, cancel.clone()).await.context("failed to open controller session")?);
    info!(host = %cfg.endpoint.host, port = cfg.endpoint.port, "controller session open");

    let catalog = VariableCatalog::new(Arc::clone(&session));
    let found = catalog
        .enumerate(cfg.enumeration.wid_range(), cfg.enumeration.max_variables, cfg.enumeration.max_consecutive_failures, cfg.timers.probe_pace)
        .await
        .context("enumeration failed")?;
    info!(found, "enumerated variable directory");

    for variable in catalog.variables() {
        if !variable.is_scalar() {
            continue;
        }
        match catalog.read_scalar(variable.wid).await {
            Ok(value) => info!(name = %variable.name, wid = variable.wid, %value, "read"),
            Err(e) => info!(name = %variable.name, wid = variable.wid, error = %e, "read failed"),
        }
    }

    cancel.cancel();
    Ok(())
}
