/*
BSD 2-Clause License

Copyright (c) 2022, Diagnosis and Control of Clouds Laboratory
All rights reserved.

Redistribution and use in source and binary forms, with or without
modification, are permitted provided that the following conditions are met:

1. Redistributions of source code must retain the above copyright notice, this
   list of conditions and the following disclaimer.

2. Redistributions in binary form must reproduce the above copyright notice,
   this list of conditions and the following disclaimer in the documentation
   and/or other materials provided with the distribution.

THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

*/

//! Rig configuration for the demonstration binary. The core library takes
//! all of its parameters as constructor arguments (spec §6); this module is
//! an out-of-scope convenience for wiring up a concrete run from a TOML
//! file, kept separate so the library itself never reads the filesystem.

use std::path::PathBuf;

use config::{Config, File as ConfigFile, FileFormat};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "/etc/daqctl/rig.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct RigConfig {
    /// Path to the `.hdf5` file the demo session writes to.
    pub experiment_path: PathBuf,
    pub purpose: String,
    pub device_name: String,
    pub device_manufacturer: String,
    pub source_label: String,
    pub group_label: String,
    pub protocol_id: String,
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: f64,
    #[serde(default = "default_epoch_seconds")]
    pub epoch_seconds: f64,
}

fn default_sample_rate_hz() -> f64 {
    1000.0
}

fn default_epoch_seconds() -> f64 {
    1.0
}

impl RigConfig {
    pub fn read(path: Option<&str>) -> Result<RigConfig, config::ConfigError> {
        let mut settings = Config::default();
        settings.merge(ConfigFile::new(path.unwrap_or(DEFAULT_CONFIG_PATH), FileFormat::Toml))?;
        settings.try_into()
    }
}
