// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, error::Error, path::Path, str::FromStr};

use clap::{Arg, ArgAction, ArgMatches, Command};
use env_logger::Builder;
use itertools::Itertools;
use log::LevelFilter;
use serde_json::{json, Value};

use installer_storage::{
    engine::{
        do_auto_partition, BlockDeviceInfo, ClearPartType, DeviceClass, DeviceTree, FitStrategy, FormatRegistry,
        Host, Partitions, SimHost, SimProbe, StorageConfig,
    },
    storage::{StorageError, StorageResult},
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn parse_args() -> Command {
    Command::new("installer-storage")
        .version(VERSION)
        .about("Inspect and plan the storage layout of an installation")
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .num_args(1)
                .global(true)
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Sets level for generation of log messages."),
        )
        .subcommand_required(true)
        .subcommands(vec![
            Command::new("probe")
                .about("Print the block devices of this machine as a device tree.")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON rather than a table."),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .num_args(1)
                        .help("Storage configuration file."),
                ),
            Command::new("plan")
                .about("Lay out the default partitions on simulated disks.")
                .arg(
                    Arg::new("sim_disk")
                        .long("sim-disk")
                        .num_args(1)
                        .action(ArgAction::Append)
                        .required(true)
                        .value_name("NAME:SIZE_MB")
                        .help("A simulated disk. May be specified multiple times."),
                )
                .arg(
                    Arg::new("mem")
                        .long("mem")
                        .num_args(1)
                        .value_parser(clap::value_parser!(u64))
                        .help("Installed memory in MB."),
                )
                .arg(
                    Arg::new("clear_part")
                        .long("clear-part")
                        .num_args(1)
                        .value_parser(["none", "linux", "all"])
                        .help("Which existing partitions to remove."),
                )
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .num_args(1)
                        .value_parser(["best", "largest"])
                        .help("How sized requests choose among free regions."),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .num_args(1)
                        .help("Storage configuration file."),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON rather than text."),
                ),
        ])
}

fn load_config(args: &ArgMatches) -> StorageResult<StorageConfig> {
    match args.get_one::<String>("config") {
        Some(path) => StorageConfig::load(Path::new(path)),
        None => Ok(StorageConfig::default()),
    }
}

/// Parse a NAME:SIZE_MB simulated disk.
fn parse_sim_disk(spec: &str) -> StorageResult<BlockDeviceInfo> {
    let (name, size) = spec.split_once(':').ok_or_else(|| {
        StorageError::Msg(format!("Simulated disk \"{spec}\" is not NAME:SIZE_MB"))
    })?;
    let size = size.parse::<f64>()?;
    if name.is_empty() || size <= 0.0 {
        return Err(StorageError::Msg(format!(
            "Simulated disk \"{spec}\" needs a name and a positive size"
        )));
    }
    Ok(BlockDeviceInfo::new(name, DeviceClass::Disk, size))
}

fn tree_json(tree: &DeviceTree) -> Value {
    Value::Array(
        tree.devices()
            .map(|(_, device)| {
                json!({
                    "name": device.name(),
                    "type": device.type_name(),
                    "path": device.path(),
                    "size": device.size(),
                    "exists": device.exists(),
                    "format": device.format().type_name(),
                    "mountpoint": device.format().mountpoint(),
                })
            })
            .collect(),
    )
}

fn print_tree(tree: &DeviceTree) {
    println!(
        "{:<20} {:<10} {:>12} {:<10} MOUNTPOINT",
        "NAME", "TYPE", "SIZE (MB)", "FORMAT"
    );
    for (_, device) in tree.devices().sorted_by(|a, b| a.1.name().cmp(b.1.name())) {
        println!(
            "{:<20} {:<10} {:>12.1} {:<10} {}",
            device.name(),
            device.type_name(),
            device.size(),
            device.format().type_name().unwrap_or("-"),
            device
                .format()
                .mountpoint()
                .map(|m| m.display().to_string())
                .unwrap_or_default()
        );
    }
}

#[cfg(feature = "udev")]
fn probe(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    use installer_storage::engine::{LinuxHost, UdevProbe};

    let config = load_config(args)?;
    let host = LinuxHost::new();
    let mut registry = FormatRegistry::new().with_ext4_migrate(config.ext4_migrate);
    registry.load_kernel_filesystems(&host);
    let mut tree = DeviceTree::new(&config);
    tree.populate(&mut UdevProbe::new(&host), &host, &registry)?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&tree_json(&tree))?);
    } else {
        print_tree(&tree);
    }
    Ok(())
}

#[cfg(not(feature = "udev"))]
fn probe(_args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    Err(Box::new(StorageError::Msg(
        "probing requires the udev feature".into(),
    )))
}

fn plan(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args)?;
    config.reinitialize_disks = true;
    if let Some(clear_part) = args.get_one::<String>("clear_part") {
        config.clear_part = ClearPartType::from_str(clear_part)?;
    }
    if let Some(strategy) = args.get_one::<String>("strategy") {
        config.fit_strategy = match strategy.as_str() {
            "largest" => FitStrategy::LargestFit,
            _ => FitStrategy::BestFit,
        };
    }
    let disks = args
        .get_many::<String>("sim_disk")
        .map(|specs| specs.map(|s| parse_sim_disk(s)).collect::<StorageResult<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    let host = SimHost::new();
    if let Some(mem) = args.get_one::<u64>("mem") {
        host.set_mem_mb(*mem);
    }
    for disk in &disks {
        host.add_node(format!("/dev/{}", disk.name));
    }
    let registry = FormatRegistry::new().with_ext4_migrate(config.ext4_migrate);
    let mut tree = DeviceTree::new(&config);
    tree.populate(&mut SimProbe::new(disks), &host, &registry)?;

    let mut partitions = Partitions::new();
    let report = do_auto_partition(&mut tree, &mut partitions, &registry, &host, &config)?;
    let actions = tree
        .actions()
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>();
    tree.process_actions(&host)?;
    let fstab = tree.fstab();

    if args.get_flag("json") {
        let output = json!({
            "devices": tree_json(&tree),
            "actions": actions,
            "report": report,
            "fstab": fstab.to_string(),
            "mem_kib": host.mem_installed_kib()?,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_tree(&tree);
        println!();
        for action in &actions {
            println!("{action}");
        }
        if !report.is_clean() {
            println!();
            print!("{report}");
        }
        println!();
        print!("{fstab}");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args().get_matches();

    let mut builder = Builder::new();
    if let Some(log_level) = args.get_one::<String>("log_level") {
        builder.filter(
            Some("installer_storage"),
            LevelFilter::from_str(log_level)
                .expect("argument parser only accepts valid log levels"),
        );
    } else if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    }
    builder.init();

    match args.subcommand() {
        Some(("probe", sub_m)) => probe(sub_m),
        Some(("plan", sub_m)) => plan(sub_m),
        _ => unreachable!("Impossible subcommand name"),
    }
}
