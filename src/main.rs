// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command line simulator for the Exynos PCIe root complex core. Plays the
//! role the debug interface plays on real hardware: each subcommand runs one
//! scenario against the fake backend, starting from a cold channel.

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use argh::FromArgs;
use log::info;
use pcie_rc::config::ChannelConfig;
use pcie_rc::events::EventKind;
use pcie_rc::fake::FakeHw;
use pcie_rc::regs::IRQ_LINK_DOWN;
use pcie_rc::regs::IRQ_RADM_CPL_TIMEOUT;
use pcie_rc::regs::LTSSM_STATE_MASK;
use pcie_rc::regs::PCIE_IRQ1;
use pcie_rc::regs::PCIE_IRQ2;
use pcie_rc::ExynosPcieRc;
use pcie_rc::L1ssCtrlId;

#[derive(FromArgs)]
/// Exercise the PCIe RC link power sequencing core against fake hardware.
struct Args {
    /// channel configuration file (JSON); defaults to a gen3 x1 WLAN channel
    #[argh(option)]
    config: Option<PathBuf>,
    /// PHY calibration image replayed during bring-up
    #[argh(option)]
    phycal: Option<PathBuf>,
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Poweron(PoweronCommand),
    Poweroff(PoweroffCommand),
    PowerCycle(PowerCycleCommand),
    LinkTest(LinkTestCommand),
    DislinkTest(DislinkTestCommand),
    CtoTest(CtoTestCommand),
    L1ss(L1ssCommand),
    Speed(SpeedCommand),
    History(HistoryCommand),
    Dump(DumpCommand),
}

#[derive(FromArgs)]
/// bring the link up and report its state
#[argh(subcommand, name = "poweron")]
struct PoweronCommand {}

#[derive(FromArgs)]
/// bring the link up, then take it down again
#[argh(subcommand, name = "poweroff")]
struct PoweroffCommand {}

#[derive(FromArgs)]
/// bring the link up, power-cycle it and report the result
#[argh(subcommand, name = "power-cycle")]
struct PowerCycleCommand {}

#[derive(FromArgs)]
/// repeated link up/down cycles
#[argh(subcommand, name = "link-test")]
struct LinkTestCommand {
    /// number of cycles to run
    #[argh(option, default = "10")]
    count: u32,
}

#[derive(FromArgs)]
/// inject a sudden link-down interrupt and follow the recovery
#[argh(subcommand, name = "dislink-test")]
struct DislinkTestCommand {}

#[derive(FromArgs)]
/// inject a completion timeout and run the recovery handshake
#[argh(subcommand, name = "cto-test")]
struct CtoTestCommand {}

#[derive(FromArgs)]
/// enable or disable L1 substates on the running link
#[argh(subcommand, name = "l1ss")]
struct L1ssCommand {
    /// mode: "on" or "off"
    #[argh(positional)]
    mode: String,
}

#[derive(FromArgs)]
/// renegotiate the link speed
#[argh(subcommand, name = "speed")]
struct SpeedCommand {
    /// target PCIe generation
    #[argh(positional)]
    gen: u32,
}

#[derive(FromArgs)]
/// print the LTSSM history ring after bring-up
#[argh(subcommand, name = "history")]
struct HistoryCommand {}

#[derive(FromArgs)]
/// print the diagnostic register snapshot
#[argh(subcommand, name = "dump")]
struct DumpCommand {}

fn print_status(rc: &ExynosPcieRc) {
    println!(
        "pcie{}: state {:?}, gen{} x{}, linkdown count {}",
        rc.ch_num(),
        rc.state(),
        rc.link_speed().unwrap_or(0),
        rc.link_width().unwrap_or(0),
        rc.linkdown_count(),
    );
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args: Args = argh::from_env();

    let config = match &args.config {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => ChannelConfig::default(),
    };

    let hw = Arc::new(FakeHw::new());
    if let Some(path) = &args.phycal {
        let image = phycal::Image::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!("PHY calibration image revision {}", image.revision());
        let entries = image
            .records_for(config.ch_num as u8)
            .flat_map(|record| record.entries.iter().copied())
            .collect();
        hw.load_phy_sequence(entries);
    }

    let rc = ExynosPcieRc::new(config, hw.clone(), hw.clone(), hw.clone())?;

    match args.command {
        Command::Poweron(_) => {
            rc.poweron()?;
            print_status(&rc);
        }
        Command::Poweroff(_) => {
            rc.poweron()?;
            rc.poweroff();
            print_status(&rc);
        }
        Command::PowerCycle(_) => {
            rc.poweron()?;
            rc.power_cycle()?;
            print_status(&rc);
        }
        Command::LinkTest(cmd) => {
            for i in 1..=cmd.count {
                rc.poweron()?;
                if !rc.chk_link_status() {
                    bail!("cycle {}: link not operational after power on", i);
                }
                rc.poweroff();
            }
            println!("pcie{}: {} link cycles passed", rc.ch_num(), cmd.count);
        }
        Command::DislinkTest(_) => {
            rc.poweron()?;
            let (tx, rx) = mpsc::channel();
            rc.register_event(
                EventKind::LinkDown,
                Box::new(move |ev| {
                    let _ = tx.send(ev.ch_num);
                }),
            )?;
            hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
            rc.handle_irq();
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(ch) => println!("pcie{}: link down event delivered", ch),
                Err(_) => bail!("link down event was not delivered"),
            }
            print_status(&rc);
        }
        Command::CtoTest(_) => {
            rc.poweron()?;
            hw.inject_irq(PCIE_IRQ2, IRQ_RADM_CPL_TIMEOUT);
            rc.handle_irq();
            if !rc.is_cpl_timeout_recovery() {
                bail!("completion timeout was not latched");
            }
            rc.set_ready_cto_recovery();
            rc.poweroff();
            rc.poweron()?;
            println!("pcie{}: completion timeout recovery complete", rc.ch_num());
            print_status(&rc);
        }
        Command::L1ss(cmd) => {
            rc.poweron()?;
            let enable = match cmd.mode.as_str() {
                "on" => true,
                "off" => false,
                mode => bail!("expected \"on\" or \"off\", got \"{}\"", mode),
            };
            let outcome = rc.l1ss_ctrl(enable, L1ssCtrlId::TEST)?;
            println!(
                "pcie{}: L1SS {} -> {:?}, veto mask {:?}",
                rc.ch_num(),
                cmd.mode,
                outcome,
                rc.l1ss_veto_mask()
            );
        }
        Command::Speed(cmd) => {
            rc.poweron()?;
            rc.speed_change(cmd.gen)?;
            print_status(&rc);
        }
        Command::History(_) => {
            rc.poweron()?;
            for (i, entry) in rc.link_history().iter().enumerate() {
                println!(
                    "history[{:02}]: {:10} ({:#010x})",
                    i,
                    pcie_rc::regs::ltssm_state_name(entry & LTSSM_STATE_MASK),
                    entry
                );
            }
        }
        Command::Dump(_) => {
            rc.poweron()?;
            for (name, val) in rc.register_dump() {
                println!("{:14} {:#010x}", name, val);
            }
        }
    }
    Ok(())
}
