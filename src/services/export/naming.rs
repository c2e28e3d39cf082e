//! Archive entry and file naming.

use chrono::NaiveDate;

/// Folder used for documents whose owner key is empty.
const UNKNOWN_OWNER: &str = "unknown";

/// Folder name for an owner key: every character outside `[A-Za-z0-9_]`
/// becomes `_`, and an empty key maps to `unknown`.
pub fn sanitize_owner_key(owner_key: &str) -> String {
    if owner_key.is_empty() {
        return UNKNOWN_OWNER.to_string();
    }
    owner_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Path of a document inside the archive:
/// `{export_name}/{sanitized owner key}/{file_name}`.
///
/// File names are used as stored; they are validated at upload.
pub fn entry_path(export_name: &str, owner_key: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        export_name,
        sanitize_owner_key(owner_key),
        file_name
    )
}

/// `{table}-files-{YYYY-MM-DD}`, used as the archive root folder.
pub fn export_name(table: &str, date: NaiveDate) -> String {
    format!("{}-files-{}", table, date.format("%Y-%m-%d"))
}

/// Attachment name sent in `Content-Disposition`.
pub fn archive_file_name(export_name: &str) -> String {
    format!("{export_name}.zip")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_punctuation_in_owner_keys() {
        assert_eq!(sanitize_owner_key("12.345-K"), "12_345_K");
        assert_eq!(sanitize_owner_key("ab_C9"), "ab_C9");
        assert_eq!(sanitize_owner_key("../etc"), "___etc");
        assert_eq!(sanitize_owner_key("ñandú"), "_and_");
    }

    #[test]
    fn empty_owner_key_maps_to_unknown() {
        assert_eq!(sanitize_owner_key(""), "unknown");
        assert_eq!(entry_path("x", "", "a.pdf"), "x/unknown/a.pdf");
    }

    #[test]
    fn builds_dated_export_names() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let name = export_name("nominas", date);
        assert_eq!(name, "nominas-files-2024-03-07");
        assert_eq!(archive_file_name(&name), "nominas-files-2024-03-07.zip");
        assert_eq!(
            entry_path(&name, "12.345.678-K", "contrato.pdf"),
            "nominas-files-2024-03-07/12_345_678_K/contrato.pdf"
        );
    }
}
