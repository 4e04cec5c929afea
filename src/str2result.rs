//! Textual result parser (spec §4.6).
//!
//! Parses the tiny line-oriented form out-of-process back-ends write to
//! report a completed operation:
//!
//! ```text
//! RESULT
//! code: 0
//! matched: dc=example,dc=com
//! info: some diagnostic
//! ```
//!
//! Orthogonal to the binary wire path (spec §2): this has nothing to do
//! with BER, only with turning a backend's text reply into a
//! [`ParsedResult`] the rest of the core can fold into a
//! [`crate::model::ReplyDescriptor`].

/// The out-params of a successful (or partially successful) parse (spec
/// §4.6: "returns 0 on success with out-params set").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResult {
    pub code: i64,
    pub matched: Option<String>,
    pub info: Option<String>,
}

/// Parses one `str2result`-formatted block.
///
/// Returns `Ok` only if every line was recognized and the first line was
/// exactly `RESULT`. An unknown key does not stop the parse early — later
/// recognized lines are still folded in — but the overall result is
/// `Err`, carrying whatever fields were recognized before the parse gave
/// up on correctness (spec §4.6: "Unknown-key errors do not stop parsing
/// of subsequent lines ... but the function returns -1 at the end").
pub fn str2result(input: &str) -> Result<ParsedResult, ParsedResult> {
    let mut lines = input.lines();

    match lines.next() {
        Some("RESULT") => {}
        _ => return Err(ParsedResult { code: 0, matched: None, info: None }),
    }

    let mut result = ParsedResult { code: 0, matched: None, info: None };
    let mut ok = true;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            ok = false;
            continue;
        };
        let value = value.trim_start();
        match key {
            "code" => match value.trim().parse::<i64>() {
                Ok(n) => result.code = n,
                Err(_) => ok = false,
            },
            "matched" => result.matched = Some(value.to_string()),
            "info" => result.info = Some(value.to_string()),
            _ => ok = false,
        }
    }

    if ok {
        Ok(result)
    } else {
        Err(result)
    }
}

/// Re-serializes a [`ParsedResult`] back into `str2result`'s textual
/// form, for the round-trip property in spec §8.
pub fn result2str(result: &ParsedResult) -> String {
    let mut out = String::from("RESULT\n");
    out.push_str(&format!("code: {}\n", result.code));
    if let Some(matched) = &result.matched {
        out.push_str(&format!("matched: {matched}\n"));
    }
    if let Some(info) = &result.info {
        out.push_str(&format!("info: {info}\n"));
    }
    out
}
