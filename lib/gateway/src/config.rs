// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use relay_runtime::Result;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Gateway configuration.
#[derive(Serialize, Deserialize, Validate, Debug, Clone)]
pub struct GatewayConfig {
    /// Listen port. The bare `PORT` environment variable overrides this,
    /// matching the usual container deployment convention.
    pub port: u16,

    /// Token ceiling applied to a single streaming response.
    #[validate(range(min = 1))]
    pub stream_token_ceiling: usize,

    /// Router weight for the free-VRAM score.
    pub vram_weight: f64,

    /// Router weight for the free-capacity score.
    pub load_weight: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            stream_token_ceiling: 50,
            vram_weight: 1.0,
            load_weight: 1.0,
        }
    }
}

impl GatewayConfig {
    /// Load the gateway configuration. Priority, highest first:
    /// 1. the bare `PORT` environment variable (port only)
    /// 2. `RELAY_GATEWAY_` prefixed environment variables
    /// 3. `relay.toml` in the working directory
    /// 4. built-in defaults
    pub fn from_settings() -> Result<GatewayConfig> {
        let mut config: GatewayConfig = Figment::new()
            .merge(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file("relay.toml"))
            .merge(Env::prefixed("RELAY_GATEWAY_"))
            .extract()?;

        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }

        config.validate()?;
        Ok(config)
    }
}
