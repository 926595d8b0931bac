/// Small numeric helpers shared by count tables, histograms and the run log.


/// Percentage of `part` in `whole`; 0 when `whole` is 0.
///
/// # Arguments
///
/// - `part`: Numerator, e.g. one sequence's reads.
/// - `whole`: Denominator, e.g. the table total.
///
/// # Returns
///
/// 100 × part / whole as f64.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    100.0 * part as f64 / whole as f64
}

/// Formats a percentage with a fixed number of decimals and a trailing `%`.
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, value)
}
