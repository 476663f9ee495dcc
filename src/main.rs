use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use exhume_ext2::bitmap::{BlockIndexRule, InodeBoundRule};
use exhume_ext2::error::Ext2Error;
use exhume_ext2::groupdescriptor::{summaries_to_table, GroupCountRule};
use exhume_ext2::image::DiskImage;
use exhume_ext2::superblock::FragmentSizeRule;
use exhume_ext2::{report, DecodeOptions, Ext2Image};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};

struct Settings {
    image: PathBuf,
    offset: u64,
    output_dir: PathBuf,
    json: bool,
    table: bool,
    check: bool,
    options: DecodeOptions,
}

fn process_image(settings: &Settings) -> Result<(), Ext2Error> {
    let body = DiskImage::open(&settings.image, settings.offset)?;
    body.print_info();

    let fs = Ext2Image::open(body, settings.options)?;

    if settings.check {
        let checks = fs.verify_free_counts()?;
        let bad = checks.iter().filter(|c| !c.is_consistent()).count();
        println!(
            "{} of {} groups have free counts matching their bitmaps",
            checks.len() - bad,
            checks.len()
        );
    }

    if !settings.output_dir.is_dir() {
        return Err(Ext2Error::Argument(format!(
            "output directory {} does not exist",
            settings.output_dir.display()
        )));
    }
    let mut free = Vec::new();
    report::write_all_with(&fs, &settings.output_dir, |record| {
        if settings.json {
            free.push(*record);
        }
    })?;

    if settings.table {
        println!("{}", fs.superblock.to_table());
        println!("{}", summaries_to_table(&fs.group_summaries()));
    }

    if settings.json {
        let doc = report::json_document(&fs, &free);
        match serde_json::to_string_pretty(&doc) {
            Ok(text) => println!("{}", text),
            Err(err) => eprintln!("{}", err),
        }
    }
    info!("Done with {}", settings.image.display());
    Ok(())
}

fn command() -> Command {
    Command::new("exhume_ext2")
        .version(env!("CARGO_PKG_VERSION"))
        .author("ForensicXlab")
        .about("Exhume the superblock, group descriptors and free bitmaps of an ext2 image.")
        .arg(
            Arg::new("image")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .help("The path to the ext2 image to exhume."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("The ext2 partition starts at address 0x...."),
        )
        .arg(
            Arg::new("output_dir")
                .short('d')
                .long("output-dir")
                .value_parser(clap::value_parser!(PathBuf))
                .default_value(".")
                .help("Where super.csv, group.csv and bitmap.csv are written."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print everything as one JSON document."),
        )
        .arg(
            Arg::new("table")
                .short('t')
                .long("table")
                .action(ArgAction::SetTrue)
                .help("Display the superblock and group descriptors as tables."),
        )
        .arg(
            Arg::new("check")
                .short('c')
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Cross-check descriptor free counts against the bitmaps."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("legacy_fragment_size")
                .long("legacy-fragment-size")
                .action(ArgAction::SetTrue)
                .help("Treat a negative fragment exponent as 1024 << -n."),
        )
        .arg(
            Arg::new("ceil_groups")
                .long("ceil-groups")
                .action(ArgAction::SetTrue)
                .help("Count a trailing partial block group as its own group."),
        )
        .arg(
            Arg::new("strict_inode_bound")
                .long("strict-inode-bound")
                .action(ArgAction::SetTrue)
                .help("Stop each inode bitmap scan before the group's inode bound."),
        )
        .arg(
            Arg::new("absolute_blocks")
                .long("absolute-blocks")
                .action(ArgAction::SetTrue)
                .help("Report free blocks by block number instead of scan position."),
        )
}

fn flag(matches: &clap::ArgMatches, id: &str) -> bool {
    matches.get_flag(id)
}

fn settings_from(matches: &clap::ArgMatches) -> Result<Settings, Ext2Error> {
    let image = matches
        .get_one::<PathBuf>("image")
        .cloned()
        .ok_or_else(|| Ext2Error::Argument("no input disk image".to_string()))?;
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let output_dir = matches
        .get_one::<PathBuf>("output_dir")
        .cloned()
        .unwrap_or_else(|| Path::new(".").to_path_buf());

    let options = DecodeOptions {
        fragment_size: if flag(matches, "legacy_fragment_size") {
            FragmentSizeRule::Legacy
        } else {
            FragmentSizeRule::Conventional
        },
        group_count: if flag(matches, "ceil_groups") {
            GroupCountRule::Ceiling
        } else {
            GroupCountRule::Truncating
        },
        inode_bound: if flag(matches, "strict_inode_bound") {
            InodeBoundRule::Exclusive
        } else {
            InodeBoundRule::Inclusive
        },
        block_index: if flag(matches, "absolute_blocks") {
            BlockIndexRule::Absolute
        } else {
            BlockIndexRule::ScanPosition
        },
    };

    Ok(Settings {
        image,
        offset,
        output_dir,
        json: flag(matches, "json"),
        table: flag(matches, "table"),
        check: flag(matches, "check"),
        options,
    })
}

fn main() {
    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(1),
            }
        }
    };

    let level = if flag(&matches, "verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let settings = match settings_from(&matches) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = process_image(&settings) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        command().debug_assert();
    }

    #[test]
    fn missing_image_is_rejected() {
        let err = command().try_get_matches_from(["exhume_ext2"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn flags_select_rules() {
        let matches = command()
            .try_get_matches_from([
                "exhume_ext2",
                "disk.img",
                "-o",
                "0x100000",
                "--ceil-groups",
                "--strict-inode-bound",
            ])
            .unwrap();
        let settings = settings_from(&matches).unwrap();
        assert_eq!(settings.offset, 0x100000);
        assert_eq!(settings.image, PathBuf::from("disk.img"));
        assert_eq!(settings.output_dir, PathBuf::from("."));
        assert_eq!(settings.options.group_count, GroupCountRule::Ceiling);
        assert_eq!(settings.options.inode_bound, InodeBoundRule::Exclusive);
        assert_eq!(settings.options.block_index, BlockIndexRule::ScanPosition);
        assert_eq!(
            settings.options.fragment_size,
            FragmentSizeRule::Conventional
        );
    }
}
