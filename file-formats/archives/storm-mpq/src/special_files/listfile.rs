//! (listfile) parsing and generation

use crate::Result;

/// Parse a (listfile) into individual names
///
/// Accepted layout:
/// - one name per line, CRLF or LF
/// - comments starting with ';' or '#'
/// - optional metadata after ';' on a line
/// - empty lines are ignored
pub fn parse_listfile(data: &[u8]) -> Result<Vec<String>> {
    let content = match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => {
            log::warn!("(listfile) contains invalid UTF-8, using lossy conversion");
            String::from_utf8_lossy(data).into_owned()
        }
    };

    let names: Vec<String> = content
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_end_matches('\0');
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                return None;
            }

            let name = match line.find(';') {
                Some(pos) => line[..pos].trim(),
                None => line,
            };
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect();

    log::debug!("Parsed {} names from (listfile)", names.len());
    Ok(names)
}

/// Build the contents of a (listfile)
///
/// Names are sorted case-insensitively, duplicates that differ only in case
/// are dropped and every line ends with CRLF.
pub fn build_listfile<I, S>(names: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
    names.sort_by_key(|n| n.to_ascii_uppercase());
    names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

    let mut out = Vec::with_capacity(names.iter().map(|n| n.len() + 2).sum());
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}
