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

//! Demonstration rig: wires a scripted DAQ test double to a `Controller`
//! and an HDF5-backed `Session`, and runs a single Epoch end to end.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use daqctl::clock::Clock;
use daqctl::config::RigConfig;
use daqctl::daq::sim::{ScriptedPush, SimDaq};
use daqctl::device::Device;
use daqctl::epoch::{Background, Epoch};
use daqctl::measurement::Measurement;
use daqctl::scalar::Scalar;
use daqctl::ticks::{EpochDuration, Ticks};
use daqctl::{Controller, Session};

#[derive(Parser)]
#[command(name = "daqctl")]
#[command(about = "Runs a single demonstration Epoch against a scripted DAQ")]
struct Cli {
    /// Path to a rig.toml; defaults to /etc/daqctl/rig.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config_path = cli.config.as_deref().and_then(|p| p.to_str());
    let config = match RigConfig::read(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to read rig configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        tracing::error!(error = %e, "run failed");
        std::process::exit(1);
    }
}

fn run(config: &RigConfig) -> Result<(), Box<dyn std::error::Error>> {
    let controller = Controller::new();
    let device = Device::new(config.device_name.clone(), config.device_manufacturer.clone());
    controller.add_device(device.clone())?;

    let duration = Ticks::from_seconds(config.epoch_seconds);
    let push_chunk = daqctl::chunk::Chunk::from_samples_at_rate(
        vec![Measurement::new(0.0, "V"); (config.epoch_seconds * config.sample_rate_hz) as usize],
        config.sample_rate_hz,
    );

    let daq = Arc::new(
        SimDaq::new(controller.clone(), vec![], Ticks::ZERO).with_pushes(vec![ScriptedPush {
            device: config.device_name.clone(),
            chunk: push_chunk,
        }]),
    );
    controller.with_daq(daq).with_clock(Arc::new(daqctl::clock::SystemClock));

    let start_time = daqctl::clock::SystemClock.now();
    let session = Session::create(&config.experiment_path, &config.purpose, start_time)?;
    session.add_device(&config.device_name, &config.device_manufacturer)?;
    let source = session.add_source(&config.source_label, None)?;
    session.begin_epoch_group(&config.group_label, source, start_time)?;
    session.begin_epoch_block(&config.protocol_id, start_time)?;

    controller.set_persistor(Some(Arc::new(session)));

    let mut epoch = Epoch::new(config.protocol_id.clone(), EpochDuration::Definite(duration));
    epoch.add_response(config.device_name.clone());
    epoch.add_background(config.device_name.clone(), Background { value: Measurement::new(0.0, "V") });
    epoch.protocol_parameters.insert("sampleRateHz".to_string(), Scalar::Float(config.sample_rate_hz));

    controller.run_epoch(epoch, None)?;

    tracing::info!("epoch run complete");
    Ok(())
}
