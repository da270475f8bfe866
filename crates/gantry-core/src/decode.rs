//! Pure decoding of printer telemetry reports
//!
//! Printers push JSON reports whose `print` section carries the status
//! fields. Every field is optional, and numeric fields arrive as either
//! bare numbers or numeric strings depending on firmware revision, so
//! all extraction goes through the tolerant helpers below.

use crate::types::{PrinterState, StatusSnapshot};
use serde_json::Value;

/// Model name used when neither a type code nor a serial is available
pub const GENERIC_MODEL: &str = "Unknown printer";

/// Merge the recognized fields of a telemetry report into a snapshot.
///
/// Returns `false` when the report has no `print` section, in which
/// case the snapshot is left untouched. Does not stamp `updated_at`;
/// that is the caller's job, since only a real transport delivery
/// counts as an update.
pub fn merge_report(report: &Value, serial: &str, snapshot: &mut StatusSnapshot) -> bool {
    let Some(print) = report.get("print") else {
        return false;
    };

    if let Some(code) = opt_i64(print.get("mc_print_stage")) {
        snapshot.state = PrinterState::from_stage(code);
    }
    if let Some(sub) = opt_i64(print.get("mc_print_sub_stage")) {
        snapshot.sub_state = Some(sub);
    }
    if let Some(percent) = opt_i64(print.get("mc_percent")) {
        snapshot.progress = percent.clamp(0, 100) as u8;
    }
    if let Some(task) = opt_str(print.get("subtask_name")) {
        snapshot.task = task;
    }
    if let Some(temp) = opt_f64(print.get("bed_temper")) {
        snapshot.bed_temp = temp;
    }
    if let Some(temp) = opt_f64(print.get("nozzle_temper")) {
        snapshot.tool_temp = temp;
    }
    if let Some(file) = opt_str(print.get("gcode_file")) {
        snapshot.file = file;
    }
    if let Some(firmware) = opt_str(print.get("firmware")) {
        snapshot.firmware = firmware;
    }

    // A report carrying an explicit type code is authoritative for the
    // model; otherwise only fill the model in once.
    let type_code = opt_i64(print.get("printer_type"));
    if type_code.is_some() || snapshot.model.is_empty() {
        snapshot.model = detect_model(type_code, Some(serial));
    }

    true
}

/// Best-effort model detection.
///
/// Tries, in order: the explicit device-type code, the first three
/// characters of the serial number, and finally a generic placeholder.
/// The first strategy that applies wins.
pub fn detect_model(type_code: Option<i64>, serial: Option<&str>) -> String {
    if let Some(code) = type_code {
        return model_from_type_code(code);
    }
    match serial {
        Some(serial) if !serial.is_empty() => model_from_serial(serial),
        _ => GENERIC_MODEL.to_string(),
    }
}

fn model_from_type_code(code: i64) -> String {
    match code {
        1 => "X1".to_string(),
        2 => "X1 Carbon".to_string(),
        3 => "X1E".to_string(),
        4 => "P1P".to_string(),
        5 => "P1S".to_string(),
        6 => "A1".to_string(),
        other => format!("unknown type {}", other),
    }
}

fn model_from_serial(serial: &str) -> String {
    let prefix: String = serial.chars().take(3).collect();
    match prefix.as_str() {
        "00W" => "X1".to_string(),
        "00M" => "X1 Carbon".to_string(),
        "03W" => "X1E".to_string(),
        "01S" => "P1P".to_string(),
        "01P" => "P1S".to_string(),
        "039" => "A1".to_string(),
        "030" => "A1 mini".to_string(),
        _ => format!("{} series", prefix),
    }
}

fn opt_i64(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

fn opt_f64(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    if let Some(n) = value.as_f64() {
        return Some(n);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

fn opt_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_mapping() {
        let labels = ["Idle", "Printing", "Paused", "Finished", "Failed"];
        for (code, label) in labels.iter().enumerate() {
            assert_eq!(PrinterState::from_stage(code as i64).label(), *label);
        }
        assert!(PrinterState::from_stage(9).label().contains('9'));
    }

    #[test]
    fn test_stage_string_and_number_decode_identically() {
        let mut from_number = StatusSnapshot::default();
        let mut from_string = StatusSnapshot::default();
        merge_report(&json!({"print": {"mc_print_stage": 2}}), "", &mut from_number);
        merge_report(&json!({"print": {"mc_print_stage": "2"}}), "", &mut from_string);
        assert_eq!(from_number.state, PrinterState::Paused);
        assert_eq!(from_number, from_string);
    }

    #[test]
    fn test_numeric_fields_tolerate_string_encoding() {
        let mut snapshot = StatusSnapshot::default();
        let report = json!({
            "print": {
                "mc_percent": "37",
                "bed_temper": "60.5",
                "nozzle_temper": 215.0,
                "subtask_name": "benchy",
                "gcode_file": "benchy.gcode",
            }
        });
        assert!(merge_report(&report, "00M00A123456789", &mut snapshot));
        assert_eq!(snapshot.progress, 37);
        assert_eq!(snapshot.bed_temp, 60.5);
        assert_eq!(snapshot.tool_temp, 215.0);
        assert_eq!(snapshot.task, "benchy");
        assert_eq!(snapshot.file, "benchy.gcode");
    }

    #[test]
    fn test_report_without_print_section_is_ignored() {
        let mut snapshot = StatusSnapshot::default();
        snapshot.task = "previous".to_string();
        assert!(!merge_report(&json!({"system": {"command": "ack"}}), "", &mut snapshot));
        assert_eq!(snapshot.task, "previous");
    }

    #[test]
    fn test_model_type_code_wins_over_serial() {
        assert_eq!(detect_model(Some(2), Some("01S00A123456789")), "X1 Carbon");
    }

    #[test]
    fn test_model_unknown_type_code_embeds_code() {
        let model = detect_model(Some(42), Some("01S00A123456789"));
        assert!(model.contains("42"), "{model}");
    }

    #[test]
    fn test_model_serial_prefix() {
        assert_eq!(detect_model(None, Some("01S00A123456789")), "P1P");
        assert_eq!(detect_model(None, Some("030AB000000000")), "A1 mini");
    }

    #[test]
    fn test_model_unknown_prefix_embeds_prefix() {
        let model = detect_model(None, Some("ZZZ00A123456789"));
        assert!(model.contains("ZZZ"), "{model}");
    }

    #[test]
    fn test_model_never_empty() {
        assert_eq!(detect_model(None, None), GENERIC_MODEL);
        assert_eq!(detect_model(None, Some("")), GENERIC_MODEL);
    }

    #[test]
    fn test_partial_report_does_not_downgrade_model() {
        let mut snapshot = StatusSnapshot::default();
        merge_report(
            &json!({"print": {"printer_type": 3}}),
            "01S00A123456789",
            &mut snapshot,
        );
        assert_eq!(snapshot.model, "X1E");
        // Later partial report without a type code keeps the detected model
        merge_report(
            &json!({"print": {"mc_percent": 50}}),
            "01S00A123456789",
            &mut snapshot,
        );
        assert_eq!(snapshot.model, "X1E");
    }
}
