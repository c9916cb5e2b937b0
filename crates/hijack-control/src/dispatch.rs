//! Command dispatch for one control-surface line (§6 command table).

use hijack_core::Hijacker;

use crate::payload::{parse_json, parse_kv, ParseError};

/// Dispatch one decoded request line to `hijacker`, returning the exact
/// text to write back (without the trailing newline `serve` appends).
pub fn handle_line(line: &str, hijacker: &Hijacker) -> String {
    let (head, rest) = match line.split_once(' ') {
        Some((h, r)) => (h, r.trim_start()),
        None => (line, ""),
    };

    match head {
        "/echo" => rest.to_string(),
        "/get" if rest == "funcs" => {
            let mut names = hijacker.funcs();
            names.sort();
            format!("funcs:{}", names.join("\n"))
        }
        "/get" if rest == "points" => {
            let mut names = hijacker.points();
            names.sort();
            format!("points:{}", names.join("\n"))
        }
        "/post" => handle_post(rest, hijacker),
        "/delete" => {
            hijacker.release(rest);
            "ok".to_string()
        }
        _ => format!("unknown:{line}"),
    }
}

fn handle_post(payload: &str, hijacker: &Hijacker) -> String {
    let point = if payload.trim_start().starts_with('{') {
        parse_json(payload)
    } else {
        parse_kv(payload)
    };

    let point = match point {
        Ok(p) => p,
        Err(ParseError::Malformed) => return "error:parse error".to_string(),
        Err(ParseError::UnknownAction(a)) => return format!("error:unsupported action: {a}"),
    };

    match hijacker.apply(point) {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error:{e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_the_argument_verbatim() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        assert_eq!(handle_line("/echo hello world", &hijacker), "hello world");
    }

    #[test]
    fn get_funcs_lists_known_symbols() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        let resp = handle_line("/get funcs", &hijacker);
        assert!(resp.starts_with("funcs:"));
    }

    #[test]
    fn get_points_starts_empty() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        assert_eq!(handle_line("/get points", &hijacker), "points:");
    }

    #[test]
    fn unknown_command_echoes_the_whole_line() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        assert_eq!(handle_line("/frobnicate x", &hijacker), "unknown:/frobnicate x");
    }

    #[test]
    fn delete_on_absent_function_is_ok() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        assert_eq!(handle_line("/delete no_such_fn", &hijacker), "ok");
    }

    #[test]
    fn post_with_malformed_payload_reports_parse_error() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        assert_eq!(handle_line("/post not json or kv", &hijacker), "error:parse error");
    }

    #[test]
    fn post_for_a_missing_function_reports_point_not_found() {
        let hijacker = hijack_core::start().expect("test binary carries debug info");
        let resp = handle_line("/post func:no_such_fn,action:delay,val:10", &hijacker);
        assert!(resp.starts_with("error:"));
    }
}
