use crate::model::ProgressSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;

// `[download]  42.0% of ~  3.50MiB at  1.20MiB/s ETA 00:03 (frag 2/9)`
static PROGRESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~?\s*(\S+)\s+at\s+(.+?)\s+ETA\s+(\S+)")
        .expect("progress grammar is a valid regex")
});

/// Parses one downloader output line into a progress snapshot.
///
/// Lines that do not follow the progress grammar yield `None`.
pub fn parse_progress_from_line(line: &str) -> Option<ProgressSnapshot> {
    let caps = PROGRESS_LINE.captures(line.trim())?;
    let percent = caps[1].parse::<f32>().ok()?;
    Some(ProgressSnapshot {
        percent,
        size: caps[2].to_string(),
        rate: caps[3].trim().to_string(),
        eta: caps[4].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regular_progress_line() {
        let snap =
            parse_progress_from_line("[download]  45.3% of    3.45MiB at    1.23MiB/s ETA 00:02")
                .unwrap();
        assert_eq!(snap.percent, 45.3);
        assert_eq!(snap.size, "3.45MiB");
        assert_eq!(snap.rate, "1.23MiB/s");
        assert_eq!(snap.eta, "00:02");
    }

    #[test]
    fn parses_estimated_size_and_unknown_rate() {
        let snap = parse_progress_from_line(
            "[download]   3.0% of ~  10.00MiB at  Unknown B/s ETA Unknown (frag 1/20)",
        )
        .unwrap();
        assert_eq!(snap.percent, 3.0);
        assert_eq!(snap.size, "10.00MiB");
        assert_eq!(snap.rate, "Unknown B/s");
        assert_eq!(snap.eta, "Unknown");
    }

    #[test]
    fn ignores_other_output() {
        assert!(parse_progress_from_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_progress_from_line("[download] Destination: /tmp/x.webm").is_none());
        assert!(parse_progress_from_line("[download] 100% of 3.45MiB in 00:02").is_none());
        assert!(parse_progress_from_line("").is_none());
    }
}
