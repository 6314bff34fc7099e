use jvmc::demos::{self, Demo, DemoSize};
use jvmc::mc::{Config, MatchPolicy, Report, Search, StateStatus, Trace};
use jvmc::vm::VmError;

use clap::{value_parser, Arg, ArgAction, Command};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn main() -> Result<(), VmError> {
    env_logger::init();

    let matches = Command::new("JVM bytecode model checker")
        .version(clap::crate_version!())
        .about("Explore every interleaving of a built-in concurrent demo program")
        .arg(
            Arg::new("demo")
                .help("Demo program to check")
                .required(true)
                .value_parser(Demo::ALL.map(Demo::name))
                .index(1),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .default_value("2")
                .help("Number of worker threads"),
        )
        .arg(
            Arg::new("iterations")
                .long("iterations")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .default_value("2")
                .help("Iterations per worker (or upper bound of the data choice)"),
        )
        .arg(
            Arg::new("hash-only")
                .long("hash-only")
                .action(ArgAction::SetTrue)
                .help("Match states by 64-bit fingerprint instead of full comparison"),
        )
        .arg(
            Arg::new("break-single")
                .long("break-single")
                .action(ArgAction::SetTrue)
                .help("End steps even at scheduling points with a single runnable thread"),
        )
        .arg(
            Arg::new("max-depth")
                .long("max-depth")
                .value_name("DEPTH")
                .value_parser(value_parser!(usize))
                .help("Do not explore paths longer than this"),
        )
        .arg(
            Arg::new("record-steps")
                .long("record-steps")
                .action(ArgAction::SetTrue)
                .help("Record every executed instruction in traces"),
        )
        .arg(
            Arg::new("all-findings")
                .long("all-findings")
                .action(ArgAction::SetTrue)
                .help("Keep searching after the first finding"),
        )
        .arg(
            Arg::new("save-trace")
                .long("save-trace")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Write the trace of the first finding to this file"),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .conflicts_with("save-trace")
                .help("Replay a saved trace instead of searching"),
        )
        .get_matches();

    let demo = matches
        .get_one::<String>("demo")
        .and_then(|name| Demo::from_name(name))
        .ok_or_else(|| VmError::BadEntryPoint(String::from("unknown demo")))?;
    let size = DemoSize {
        threads: matches.get_one::<usize>("threads").copied().unwrap_or(2),
        iterations: matches.get_one::<usize>("iterations").copied().unwrap_or(2),
    };

    let mut config = Config::new();
    if matches.get_flag("hash-only") {
        config.state_matching = MatchPolicy::HashOnly;
    }
    config.break_on_single_choice = matches.get_flag("break-single");
    config.record_steps = matches.get_flag("record-steps");
    config.max_depth = matches.get_one::<usize>("max-depth").copied();
    config.stop_on_first_finding = !matches.get_flag("all-findings");

    let mut machine = demos::machine(demo, &size, config)?;
    let stdout = StandardStream::stdout(ColorChoice::Auto);

    if let Some(path) = matches.get_one::<PathBuf>("replay") {
        log::info!("Replaying '{}'", path.display());
        let trace = Trace::load(path)?;
        let status = machine.replay(&trace)?;
        let failed = print_replay(&stdout, demo, &trace, &status)?;
        exit(if failed { 1 } else { 0 })
    }

    log::info!("Checking {} with {:?}", demo, size);
    let report = Search::new(machine).run()?;
    print_report(&stdout, demo, &report)?;

    if let (Some(path), Some(finding)) = (
        matches.get_one::<PathBuf>("save-trace"),
        report.findings.first(),
    ) {
        log::info!("Writing '{}'", path.display());
        finding.trace.save(path)?;
    }

    exit(if report.has_findings() { 1 } else { 0 })
}

fn print_report(stdout: &StandardStream, demo: Demo, report: &Report) -> io::Result<()> {
    let mut s = stdout.lock();
    s.set_color(ColorSpec::new().set_bold(true))?;
    write!(s, "{}", demo)?;
    s.set_color(ColorSpec::new().set_dimmed(true))?;
    write!(s, " [")?;
    if report.has_findings() {
        s.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
        write!(s, "{} finding(s)", report.findings.len())?;
    } else {
        s.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(s, "no findings")?;
    }
    s.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(s, "]")?;
    s.reset()?;

    let stats = &report.statistics;
    writeln!(
        s,
        "  search {}: {} new states, {} visited, {} end states, {} ignored",
        if report.complete { "complete" } else { "stopped" },
        stats.new_states,
        stats.visited_states,
        stats.end_states,
        stats.ignored_states
    )?;
    writeln!(
        s,
        "  {} transitions, {} backtracks, max depth {}",
        stats.transitions, stats.backtracks, stats.max_depth
    )?;

    for (idx, finding) in report.findings.iter().enumerate() {
        s.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(s, "\nfinding #{}: ", idx)?;
        s.reset()?;
        writeln!(s, "{}", finding)?;
        s.set_color(ColorSpec::new().set_dimmed(true))?;
        write!(s, "{}", finding.trace)?;
        s.reset()?;
    }
    Ok(())
}

/// Print the outcome of a replay, returning whether it ended in a finding
fn print_replay(
    stdout: &StandardStream,
    demo: Demo,
    trace: &Trace,
    status: &StateStatus,
) -> io::Result<bool> {
    let mut s = stdout.lock();
    s.set_color(ColorSpec::new().set_bold(true))?;
    write!(s, "{}", demo)?;
    s.reset()?;
    writeln!(s, " replayed {} transition(s)", trace.len())?;
    s.set_color(ColorSpec::new().set_dimmed(true))?;
    write!(s, "{}", trace)?;
    s.reset()?;

    let (color, summary, failed) = match status {
        StateStatus::Open => (Color::Yellow, String::from("still open"), false),
        StateStatus::EndState => (Color::Green, String::from("end state"), false),
        StateStatus::Ignored => (Color::Yellow, String::from("ignored"), false),
        StateStatus::Deadlock(threads) => {
            let mut summary = String::from("deadlock");
            for thread in threads {
                summary.push_str(&format!("\n\t{}", thread));
            }
            (Color::Red, summary, true)
        }
        StateStatus::Uncaught(uncaught) => (Color::Red, uncaught.to_string(), true),
        StateStatus::Violation(message) => {
            (Color::Red, format!("property violation: {}", message), true)
        }
    };
    s.set_color(ColorSpec::new().set_fg(Some(color)))?;
    writeln!(s, "{}", summary)?;
    s.reset()?;
    Ok(failed)
}
