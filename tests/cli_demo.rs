//! CLI integration tests for the demo mode.

use std::process::Command;

#[test]
fn demo_cli_reports_a_consistent_task_ledger() {
    let bin = env!("CARGO_BIN_EXE_foreman");
    // Short run keeps the test quick; the seed makes it reproducible.
    let output = Command::new(bin)
        .args(["demo", "900", "7"])
        .output()
        .expect("failed to run demo binary");

    assert!(
        output.status.success(),
        "demo exited with non-zero status: {:?}",
        output.status
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("DEMO SUMMARY"),
        "demo summary missing from output"
    );

    // The open-task counter must agree with the bucket contents.
    let sync_line = stdout
        .lines()
        .find(|line| line.starts_with("open_tasks_in_sync="))
        .expect("open_tasks_in_sync line missing");
    assert_eq!(sync_line.trim(), "open_tasks_in_sync=true");

    // The starting base must have grown the economy.
    let builds_line = stdout
        .lines()
        .find(|line| line.starts_with("builds_ordered="))
        .expect("builds_ordered line missing");
    let builds: usize = builds_line
        .split(['=', ' '])
        .nth(1)
        .and_then(|v| v.parse().ok())
        .expect("builds_ordered value");
    assert!(builds > 0, "demo never ordered a build: {stdout}");
}

#[test]
fn identical_seeds_produce_identical_demo_summaries() {
    let bin = env!("CARGO_BIN_EXE_foreman");
    let run = || {
        let output = Command::new(bin)
            .args(["demo", "600", "11"])
            .output()
            .expect("failed to run demo binary");
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        // Drop the survey line: background completion timing may differ.
        stdout
            .lines()
            .filter(|line| !line.starts_with("survey_spots="))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(run(), run());
}
