//! Human-readable status strings shared by the copy engine and the
//! file-operation handlers.

/// Groups a number with commas every three digits.
pub fn commas(value: u64) -> String {
    let digits = value.to_string();
    let mut output = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && index % 3 == offset % 3 {
            output.push(',');
        }
        output.push(ch);
    }
    output
}

/// Abbreviates a byte count by decimal triplet: `512B`, `65.5KB`,
/// `2.0MB`.
pub fn pretty_bytes(value: u64) -> String {
    const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];
    let digits = value.to_string().len();
    let triples = ((digits.saturating_sub(1)) / 3).min(UNITS.len());
    if triples == 0 {
        return format!("{value}B");
    }
    let power = 1000u64.pow(triples as u32);
    format!("{:.1}{}", value as f64 / power as f64, UNITS[triples - 1])
}

/// Completion percentage with two decimal places; zero written or zero
/// total reads as `0.00%`.
pub fn percent(written: u64, total: u64) -> String {
    if written == 0 || total == 0 {
        return "0.00%".into();
    }
    format!("{:.2}%", (written as f64 / total as f64) * 100.0)
}

fn count_noun(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {singular}")
    } else {
        format!("{} {plural}", commas(count))
    }
}

/// Summary line for a directory listing.
pub fn directory_status(directories: u64, files: u64, links: u64, errors: u64) -> String {
    format!(
        "{}, {}, {}, {}",
        count_noun(directories, "directory", "directories"),
        count_noun(files, "file", "files"),
        count_noun(links, "symbolic link", "symbolic links"),
        count_noun(errors, "error", "errors"),
    )
}

/// Summary line for a filesystem search.
pub fn search_status(fragment: &str, matches: u64, path: &str) -> String {
    let plural = if matches == 1 { "" } else { "es" };
    format!(
        "Search fragment \"{fragment}\" returned {} match{plural} from {path}.",
        commas(matches),
    )
}

/// Progress line for a running or finished copy job.
pub fn copy_status(count_file: u64, written: u64, total: u64, failures: u64) -> String {
    let file_plural = if count_file == 1 { "" } else { "s" };
    let fail_plural = if failures == 1 { "" } else { "s" };
    format!(
        "Copying {} complete. {} file{} written at size {} ({} bytes) with {} integrity failure{}.",
        percent(written, total),
        commas(count_file),
        file_plural,
        pretty_bytes(written),
        commas(written),
        failures,
        fail_plural,
    )
}

/// Final line for a cut job after source removal.
///
/// Removal failures are reported rather than folded into the destroyed
/// totals.
pub fn cut_status(directories: u64, files: u64, removal_failures: u64) -> String {
    let mut output = vec!["Cutting 100.00% complete.".to_string()];
    if directories > 0 {
        if directories == 1 {
            output.push("1 directory".into());
        } else {
            output.push(format!("{} directories", commas(directories)));
        }
        if files > 0 {
            output.push("and".into());
        }
    }
    if files > 0 {
        if files == 1 {
            output.push("1 file".into());
        } else {
            output.push(format!("{} files", commas(files)));
        }
    }
    output.push("destroyed.".into());
    if removal_failures > 0 {
        let suffix = if removal_failures == 1 {
            "failure remains."
        } else {
            "failures remain."
        };
        output.push(format!("{} removal {}", commas(removal_failures), suffix));
    }
    output.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commas_grouping() {
        assert_eq!(commas(0), "0");
        assert_eq!(commas(999), "999");
        assert_eq!(commas(1000), "1,000");
        assert_eq!(commas(65536), "65,536");
        assert_eq!(commas(2_000_000), "2,000,000");
        assert_eq!(commas(1_234_567_890), "1,234,567,890");
    }

    #[test]
    fn pretty_bytes_tiers() {
        assert_eq!(pretty_bytes(0), "0B");
        assert_eq!(pretty_bytes(10), "10B");
        assert_eq!(pretty_bytes(999), "999B");
        assert_eq!(pretty_bytes(1000), "1.0KB");
        assert_eq!(pretty_bytes(65536), "65.5KB");
        assert_eq!(pretty_bytes(2_000_000), "2.0MB");
        assert_eq!(pretty_bytes(3_500_000_000), "3.5GB");
    }

    #[test]
    fn percent_two_decimals() {
        assert_eq!(percent(0, 100), "0.00%");
        assert_eq!(percent(100, 0), "0.00%");
        assert_eq!(percent(50, 200), "25.00%");
        assert_eq!(percent(1, 3), "33.33%");
        assert_eq!(percent(200, 200), "100.00%");
    }

    #[test]
    fn directory_status_pluralization() {
        assert_eq!(
            directory_status(1, 2, 0, 0),
            "1 directory, 2 files, 0 symbolic links, 0 errors"
        );
        assert_eq!(
            directory_status(3, 1, 1, 2),
            "3 directories, 1 file, 1 symbolic link, 2 errors"
        );
    }

    #[test]
    fn search_status_counts() {
        assert_eq!(
            search_status(".rs", 1, "/src"),
            "Search fragment \".rs\" returned 1 match from /src."
        );
        assert_eq!(
            search_status("conf", 12, "/etc"),
            "Search fragment \"conf\" returned 12 matches from /etc."
        );
    }

    #[test]
    fn copy_status_singular() {
        assert_eq!(
            copy_status(1, 10, 10, 0),
            "Copying 100.00% complete. 1 file written at size 10B (10 bytes) with 0 integrity failures."
        );
    }

    #[test]
    fn copy_status_plural_with_failures() {
        assert_eq!(
            copy_status(3, 1500, 3000, 1),
            "Copying 50.00% complete. 3 files written at size 1.5KB (1,500 bytes) with 1 integrity failure."
        );
    }

    #[test]
    fn cut_status_combinations() {
        assert_eq!(
            cut_status(1, 3, 0),
            "Cutting 100.00% complete. 1 directory and 3 files destroyed."
        );
        assert_eq!(
            cut_status(2, 0, 0),
            "Cutting 100.00% complete. 2 directories destroyed."
        );
        assert_eq!(
            cut_status(0, 1, 0),
            "Cutting 100.00% complete. 1 file destroyed."
        );
    }

    #[test]
    fn cut_status_reports_removal_failures() {
        assert_eq!(
            cut_status(0, 2, 1),
            "Cutting 100.00% complete. 2 files destroyed. 1 removal failure remains."
        );
        assert_eq!(
            cut_status(1, 0, 2),
            "Cutting 100.00% complete. 1 directory destroyed. 2 removal failures remain."
        );
    }
}
