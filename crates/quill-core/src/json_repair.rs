use serde_json::Value;

/// Best-effort cleanup of model output that should contain JSON.
///
/// Strips markdown fences, cuts the first object or array out of surrounding
/// prose, drops trailing commas and closes whatever the model left open. When
/// the result parses it is re-serialised compactly; input with no JSON start at
/// all is returned trimmed.
pub fn repair_json_output(content: &str) -> String {
    let trimmed = content.trim();
    let unfenced = strip_code_fences(trimmed);
    let Some(start) = unfenced.find(|c: char| c == '{' || c == '[') else {
        return trimmed.to_string();
    };
    let repaired = repair_value(&unfenced[start..]);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => serde_json::to_string(&value).unwrap_or(repaired),
        Err(_) => repaired,
    }
}

fn strip_code_fences(input: &str) -> &str {
    let Some(open) = input.find("```") else {
        return input;
    };
    let after_open = &input[open + 3..];
    // skip the language tag line, e.g. ```json
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn trim_trailing_comma(out: &mut String) {
    let kept = out.trim_end().len();
    out.truncate(kept);
    if out.ends_with(',') {
        out.pop();
    }
}

fn repair_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                closers.push('}');
                out.push(ch);
            }
            '[' => {
                closers.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                if closers.last() != Some(&ch) {
                    continue;
                }
                closers.pop();
                trim_trailing_comma(&mut out);
                out.push(ch);
                if closers.is_empty() {
                    return out;
                }
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        if out.trim_end().ends_with(':') {
            out.push_str(" null");
        }
        out.push(closer);
    }
    out
}
