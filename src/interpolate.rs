//! Parameter interpolation in command lines and step arguments.
//!
//! A token that is exactly `${name}` is replaced by every token of the
//! parameter's value, so `[git-alias.sh, "${location-flags}", show]` can
//! become `[git-alias.sh, --file, cfg, show]`. A reference embedded in a
//! longer token is replaced by the value's tokens joined with spaces.
//! Write `$${` for a literal `${`, as in a shell alias body.

use crate::error::ExpandError;
use crate::matrix::Assignment;

/// Values in scope while expanding one matrix instance.
pub type Scope = Assignment<Vec<String>>;

/// Expand every token of a command line.
pub fn interpolate_tokens(tokens: &[String], scope: &Scope) -> Result<Vec<String>, ExpandError> {
    let mut result = Vec::with_capacity(tokens.len());
    for token in tokens {
        match whole_reference(token) {
            Some(name) => result.extend(lookup(name, token, scope)?.iter().cloned()),
            None => result.push(interpolate(token, scope)?),
        }
    }
    Ok(result)
}

/// Replace each `${name}` inside `s` with the parameter's tokens joined by spaces.
///
/// `$${` stands for a literal `${`.
pub fn interpolate(s: &str, scope: &Scope) -> Result<String, ExpandError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find('$') {
        result.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("$${") {
            result.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| ExpandError::Unclosed(s.to_string()))?;
            result.push_str(&lookup(&after[..end], s, scope)?.join(" "));
            rest = &after[end + 1..];
        } else {
            result.push('$');
            rest = &tail[1..];
        }
    }
    result.push_str(rest);

    Ok(result)
}

fn whole_reference(token: &str) -> Option<&str> {
    let name = token.strip_prefix("${")?.strip_suffix('}')?;
    (!name.contains('}')).then_some(name)
}

fn lookup<'a>(name: &str, context: &str, scope: &'a Scope) -> Result<&'a Vec<String>, ExpandError> {
    scope.get(name).ok_or_else(|| ExpandError::UnknownParameter {
        name: name.to_string(),
        context: context.to_string(),
    })
}
