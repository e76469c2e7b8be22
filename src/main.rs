use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chama::analysis::{self, LedgerViolation, MonthDist, MonthStats};
use chama::config::SimulationConfig;
use chama::events::{self, JournalEntry};
use chama::simulation::Simulation;
use chama::store::SqliteStore;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut seed_override: Option<u64> = None;
    let mut months_override: Option<u32> = None;
    let mut output_path = "events.ndjson".to_string();
    let mut quiet = false;
    let mut runs: Option<u64> = None;
    let mut csv_path_opt: Option<String> = None;
    let mut config_path_opt: Option<String> = None;
    let mut db_path_opt: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                seed_override = Some(args[i].parse().expect("--seed requires a u64"));
            }
            "--months" => {
                i += 1;
                months_override = Some(args[i].parse().expect("--months requires a u32"));
            }
            "--output" => {
                i += 1;
                output_path = args[i].clone();
            }
            "--quiet" => quiet = true,
            "--runs" => {
                i += 1;
                runs = Some(args[i].parse().expect("--runs requires a positive integer"));
            }
            "--csv" => {
                i += 1;
                csv_path_opt = Some(args[i].clone());
            }
            "--config" => {
                i += 1;
                config_path_opt = Some(args[i].clone());
            }
            "--db" => {
                i += 1;
                db_path_opt = Some(args[i].clone());
            }
            other => eprintln!("Warning: ignoring unknown argument {other}"),
        }
        i += 1;
    }

    let mut base_config = match config_path_opt {
        Some(ref path) => SimulationConfig::from_json_file(Path::new(path)).unwrap_or_else(|e| panic!("{e}")),
        None => SimulationConfig::canonical(),
    };
    let start_seed = seed_override.unwrap_or(base_config.seed);
    if let Some(m) = months_override {
        base_config.months = m;
    }
    let expected_per_month = base_config.group.monthly_contribution * base_config.members as u64;

    if let Some(n) = runs {
        use rayon::prelude::*;

        if db_path_opt.is_some() {
            eprintln!("Warning: --db is ignored with --runs; each run uses an in-memory store");
        }

        let all_stats: Vec<Vec<MonthStats>> = (0u64..n)
            .into_par_iter()
            .map(|i| {
                let mut config = base_config.clone();
                config.seed = start_seed + i;
                let mut sim = Simulation::from_config(config);
                sim.start().expect("simulation setup failed");
                sim.run().expect("simulation failed");
                analysis::analyse(&sim.into_log())
            })
            .collect();

        if let Some(ref csv_path) = csv_path_opt {
            write_runs_csv(&all_stats, start_seed, expected_per_month, csv_path);
        }

        if !quiet {
            print_all_run_months(&all_stats, start_seed, expected_per_month);
            if n < 2 {
                eprintln!("Warning: Distribution requires >= 2 runs");
            } else {
                let dists = analysis::analyse_distributions(&all_stats);
                print_distributions(&dists, n);
            }
        }
    } else {
        let mut config = base_config;
        config.seed = start_seed;

        let log = match db_path_opt {
            Some(path) => {
                let mut store_config = config.store.clone();
                store_config.path = Some(path);
                let store = SqliteStore::open(&store_config).expect("failed to open database");
                let mut sim = Simulation::with_store(config, store);
                sim.start().expect("simulation setup failed");
                sim.run().expect("simulation failed");
                sim.into_log()
            }
            None => {
                let mut sim = Simulation::from_config(config);
                sim.start().expect("simulation setup failed");
                sim.run().expect("simulation failed");
                sim.into_log()
            }
        };

        let file = File::create(&output_path).expect("failed to create output file");
        let mut writer = BufWriter::new(file);
        events::write_ndjson(&mut writer, &log).expect("failed to write events");
        writer.flush().expect("failed to flush output file");

        if !quiet {
            println!("Events recorded: {}", log.len());
            print_analysis(&log, expected_per_month);
        }
    }
}

fn print_analysis(log: &[JournalEntry], expected_per_month: u64) {
    // ── Ledger invariants ─────────────────────────────────────────────────────
    let violations = analysis::verify_ledger(log);

    let inv = |variant: fn(&LedgerViolation) -> bool| {
        if violations.iter().any(variant) { "FAIL" } else { "PASS" }
    };

    println!("\n=== Ledger invariants ===");
    println!("  [1] Payment fully allocated:          {}", inv(|v| matches!(v, LedgerViolation::AllocationNotConserved { .. })));
    println!("  [2] One accrual per member-month:     {}", inv(|v| matches!(v, LedgerViolation::DuplicateAccrual { .. })));
    println!("  [3] No late flag on a missed month:   {}", inv(|v| matches!(v, LedgerViolation::LateAfterMissed { .. })));
    println!("  [4] Loan lifecycle edges:             {}", inv(|v| matches!(v, LedgerViolation::IllegalLoanTransition { .. })));
    println!("  [5] Transitions follow a request:     {}", inv(|v| matches!(v, LedgerViolation::TransitionWithoutRequest { .. })));
    println!("  [6] One open loan per member:         {}", inv(|v| matches!(v, LedgerViolation::OverlappingOpenLoans { .. })));

    if violations.is_empty() {
        println!("  All ledger invariants: PASS");
    } else {
        println!("\n  {} violation(s):", violations.len());
        for v in &violations {
            println!("    {v}");
        }
    }

    // ── Month table ───────────────────────────────────────────────────────────
    let stats = analysis::analyse(log);
    if stats.is_empty() {
        return;
    }

    println!("\n=== Month table ===");
    println!(
        "{:>7} | {:>10} | {:>6} | {:>9} | {:>7} | {:>6} | {:>5} | {:>6} | {:>8} | {:>6} | {:>6} | {:>5} | {:>5}",
        "Month", "Collected", "Coll%", "Penalties", "Recov%", "Missed", "Late", "LoanRq", "Disbursed", "Compl", "Deflt", "Susp", "Errs"
    );
    println!("{}", "-".repeat(118));

    for s in &stats {
        println!(
            "{:>4}-{:02} | {:>10} | {:>5.1}% | {:>9} | {:>6.1}% | {:>6} | {:>5} | {:>6} | {:>9} | {:>6} | {:>6} | {:>5} | {:>5}",
            s.period.year,
            s.period.month,
            s.collected,
            s.collection_rate(expected_per_month) * 100.0,
            s.penalties_charged,
            s.recovery_rate() * 100.0,
            s.missed_count,
            s.late_count,
            s.loans_requested,
            s.principal_disbursed,
            s.loans_completed,
            s.defaults,
            s.suspensions,
            s.accrual_errors,
        );
    }
}

fn write_runs_csv(all_stats: &[Vec<MonthStats>], start_seed: u64, expected_per_month: u64, path: &str) {
    let file = File::create(path).unwrap_or_else(|e| panic!("failed to create {path}: {e}"));
    let mut w = BufWriter::new(file);
    writeln!(
        w,
        "seed,period,collected,collection_rate,penalties_charged,penalties_recovered,missed,late,partial,loans_requested,loans_rejected,loans_disbursed,principal_disbursed,defaults,suspensions"
    )
    .expect("write");
    for (i, run) in all_stats.iter().enumerate() {
        let seed = start_seed + i as u64;
        for s in run {
            writeln!(
                w,
                "{},{}-{:02},{},{:.6},{},{},{},{},{},{},{},{},{},{},{}",
                seed,
                s.period.year,
                s.period.month,
                s.collected,
                s.collection_rate(expected_per_month),
                s.penalties_charged,
                s.penalties_recovered,
                s.missed_count,
                s.late_count,
                s.partial_count,
                s.loans_requested,
                s.loans_rejected,
                s.loans_disbursed,
                s.principal_disbursed,
                s.defaults,
                s.suspensions,
            )
            .expect("write");
        }
    }
}

fn print_all_run_months(all_stats: &[Vec<MonthStats>], start_seed: u64, expected_per_month: u64) {
    println!("\n=== Per-Run Month Data ===");
    println!(
        "{:>6} | {:>7} | {:>6} | {:>9} | {:>6} | {:>5} | {:>6} | {:>5}",
        "Seed", "Month", "Coll%", "Penalties", "Missed", "Late", "Disb#", "Dflt#"
    );
    println!("{}", "-".repeat(70));

    for (i, run) in all_stats.iter().enumerate() {
        let seed = start_seed + i as u64;
        for s in run {
            println!(
                "{:>6} | {:>4}-{:02} | {:>5.1}% | {:>9} | {:>6} | {:>5} | {:>6} | {:>5}",
                seed,
                s.period.year,
                s.period.month,
                s.collection_rate(expected_per_month) * 100.0,
                s.penalties_charged,
                s.missed_count,
                s.late_count,
                s.loans_disbursed,
                s.defaults,
            );
        }
    }
}

fn print_dist_section<F>(title: &str, dists: &[MonthDist], scale: f64, extract: F)
where
    F: Fn(&MonthDist) -> &analysis::DistStats,
{
    println!("\n--- {title} ---");
    println!(
        "{:>7} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9}",
        "Month", "min", "p5", "p25", "p50", "p75", "p95", "max", "mean", "stddev"
    );
    for md in dists {
        let ds = extract(md);
        println!(
            "{:>4}-{:02} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1} | {:>9.1}",
            md.period.year,
            md.period.month,
            ds.min * scale,
            ds.p5 * scale,
            ds.p25 * scale,
            ds.p50 * scale,
            ds.p75 * scale,
            ds.p95 * scale,
            ds.max * scale,
            ds.mean * scale,
            ds.std_dev * scale,
        );
    }
}

fn print_distributions(dists: &[MonthDist], n_runs: u64) {
    println!("\n=== Multi-Run Distribution (N={n_runs} runs) ===");

    print_dist_section("Collected", dists, 1.0, |md| &md.collected);
    print_dist_section("Penalties charged", dists, 1.0, |md| &md.penalties_charged);
    print_dist_section("Recovery%", dists, 100.0, |md| &md.recovery_rate);

    println!("\n--- Discrete Counts (p50 | max) ---");
    println!(
        "{:>7} | {:>10} | {:>10} | {:>8} | {:>8} | {:>8} | {:>8} | {:>9} | {:>9}",
        "Month", "Missed p50", "Missed max", "Late p50", "Late max", "Disb p50", "Disb max", "Dflt p50", "Dflt max"
    );
    for md in dists {
        println!(
            "{:>4}-{:02} | {:>10} | {:>10} | {:>8} | {:>8} | {:>8} | {:>8} | {:>9} | {:>9}",
            md.period.year,
            md.period.month,
            md.missed.p50,
            md.missed.max,
            md.late.p50,
            md.late.max,
            md.disbursed.p50,
            md.disbursed.max,
            md.defaults.p50,
            md.defaults.max,
        );
    }
}
