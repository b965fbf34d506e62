//! Meta-tests that verify test suite integrity
//!
//! These tests ensure that:
//! - No tests are ignored
//! - E2E test files exist
//! - Sources stay within the 100-column line width
//! - Conversion constants stay bound to the wire format

use std::process::Command;

/// Verify no tests are ignored in the workspace
///
/// Ignored tests can hide regressions. All tests must run.
#[test]
fn no_ignored_tests() {
    let output = Command::new("cargo")
        .args(["test", "--workspace", "--", "--list", "--ignored"])
        .output()
        .expect("Failed to run cargo test --list --ignored");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let ignored: Vec<&str> = stdout.lines().filter(|l| l.contains(": test")).collect();

    assert!(
        ignored.is_empty(),
        "Found {} ignored tests - all tests must run.\nIgnored tests:\n{}",
        ignored.len(),
        ignored.join("\n")
    );
}

/// Verify E2E test files exist and are not empty
#[test]
fn e2e_tests_exist() {
    let test_files = [
        "e2e_socket_feed.rs",
        "e2e_protocol_switch.rs",
        "e2e_stop_race.rs",
        "e2e_config.rs",
    ];

    for file in test_files {
        let path = format!("tests/{}", file);
        let full_path = std::path::Path::new(&path);

        assert!(
            full_path.exists(),
            "Missing E2E test file: {}. All E2E tests must be present.",
            file
        );

        let metadata = std::fs::metadata(full_path).expect("Failed to get file metadata");
        assert!(
            metadata.len() > 100,
            "E2E test file {} appears to be empty or too small ({} bytes)",
            file,
            metadata.len()
        );
    }
}

fn collect_rust_files(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "target") {
                continue;
            }
            collect_rust_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            out.push(path);
        }
    }
}

/// Verify no source line exceeds rustfmt's default width
#[test]
fn source_lines_fit_width() {
    let mut files = Vec::new();
    for dir in ["src", "tests", "benches", "crates"] {
        collect_rust_files(std::path::Path::new(dir), &mut files);
    }
    assert!(!files.is_empty(), "No Rust sources found");

    let mut long = Vec::new();
    for file in &files {
        let text = std::fs::read_to_string(file).expect("Failed to read source file");
        for (i, line) in text.lines().enumerate() {
            if line.chars().count() > 100 {
                long.push(format!("{}:{}", file.display(), i + 1));
            }
        }
    }
    assert!(long.is_empty(), "Lines over 100 columns:\n{}", long.join("\n"));
}

// ============================================================================
// WIRE FORMAT INTEGRITY TESTS
// ============================================================================

/// Offset-binary midpoint must decode to exactly zero at any scale
#[test]
fn midpoint_decodes_to_zero() {
    use ephys_socket::acquisition::convert::{raw_to_voltage, RAW_OFFSET};

    assert_eq!(RAW_OFFSET, 32768.0);
    for scale in [0.195f32, 1.0, 0.05] {
        assert_eq!(raw_to_voltage(32768, scale), 0.0);
    }
}

/// Full-scale range at the default scale is about ±6.39 mV
#[test]
fn default_scale_full_range() {
    use ephys_socket::acquisition::convert::raw_to_voltage;
    use ephys_socket::config::DEFAULT_DATA_SCALE;

    let low = raw_to_voltage(0, DEFAULT_DATA_SCALE);
    let high = raw_to_voltage(u16::MAX, DEFAULT_DATA_SCALE);
    assert!((low + 6389.76).abs() < 0.01, "low end {}", low);
    assert!((high - 6389.565).abs() < 0.01, "high end {}", high);
}

/// Streaming-client defaults match the reference stream shape
#[test]
fn stream_client_default_shape() {
    use ephys_socket::Protocol;

    let geometry = Protocol::StreamClientFeed.default_geometry();
    assert_eq!(geometry.channel_count, 8);
    assert_eq!(geometry.samples_per_chunk, 100);
}
