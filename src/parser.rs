// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Line parsers for script files and protocol commands
//!
//! Script files have the format:
//! - header lines (`count= N`, `speed= F`, `linebyline`)
//! - a `start data >>` marker
//! - body lines `Keyword(arg1,arg2,...)`
//!
//! Protocol commands are whitespace separated with double-quoted words.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{char, space0},
};

use crate::errors::ScriptError;

pub const START_DATA: &str = "start data >>";
const LINE_BY_LINE: &str = "linebyline";

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderLine {
    Count(u64),
    Speed(f64),
    LineByLine,
    StartData,
    Other,
}

fn parse_count(input: &str) -> IResult<&str, HeaderLine> {
    let (input, _) = tag("count=")(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = nom::character::complete::u64(input)?;
    Ok((input, HeaderLine::Count(value)))
}

fn parse_speed(input: &str) -> IResult<&str, HeaderLine> {
    let (input, _) = tag("speed=")(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = nom::number::complete::double(input)?;
    Ok((input, HeaderLine::Speed(value)))
}

/// Classifies one header line. A `count=` or `speed=` line whose number
/// does not parse is an error.
pub fn parse_header_line(line: &str) -> Result<HeaderLine, ScriptError> {
    let trimmed = line.trim();

    if trimmed.contains(START_DATA) {
        return Ok(HeaderLine::StartData);
    }

    if trimmed.starts_with("count=") || trimmed.starts_with("speed=") {
        let malformed = |reason: String| ScriptError::MalformedHeader {
            line: trimmed.to_string(),
            reason,
        };
        return match alt((parse_count, parse_speed)).parse(trimmed) {
            Ok((rest, header)) if rest.trim().is_empty() => Ok(header),
            Ok((rest, _)) => Err(malformed(format!("unexpected text '{}'", rest))),
            Err(e) => Err(malformed(e.to_string())),
        };
    }

    if trimmed.contains(LINE_BY_LINE) {
        return Ok(HeaderLine::LineByLine);
    }

    Ok(HeaderLine::Other)
}

/// A body line split into keyword and arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Directive<'a> {
    pub keyword: &'a str,
    pub args: Vec<&'a str>,
}

impl Directive<'_> {
    /// Keywords match anywhere in the recorded name, so decorated
    /// recordings such as `captureDispatchPointerEvent` still resolve
    pub fn is(&self, name: &str) -> bool {
        self.keyword.contains(name)
    }
}

fn parse_call(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, keyword) = take_until("(")(input)?;
    let (input, _) = char('(')(input)?;
    let (input, args) = take_until(")")(input)?;
    let (input, _) = char(')')(input)?;
    Ok((input, (keyword, args)))
}

/// Parses `Keyword(a, b, c)`. Empty parentheses give one empty argument.
pub fn parse_directive(line: &str) -> Option<Directive<'_>> {
    let (_, (keyword, args)) = parse_call(line.trim()).ok()?;
    Some(Directive {
        keyword: keyword.trim(),
        args: args.split(',').map(str::trim).collect(),
    })
}

fn replace_quoted_chars(word: &str) -> String {
    word.replace("\\\"", "\"")
}

/// Splits a protocol line on whitespace, keeping double-quoted runs as one
/// word. `\"` inside a word becomes a literal quote. An unterminated quote
/// drops the rest of the line.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut quoted: Option<String> = None;

    for token in line.split_whitespace() {
        match quoted.as_mut() {
            None if token.starts_with('"') => {
                if token.len() >= 2 && token.ends_with('"') && !token.ends_with("\\\"") {
                    words.push(replace_quoted_chars(&token[1..token.len() - 1]));
                } else {
                    quoted = Some(replace_quoted_chars(&token[1..]));
                }
            }
            None => words.push(replace_quoted_chars(token)),
            Some(word) => {
                word.push(' ');
                if token.ends_with('"') && !token.ends_with("\\\"") {
                    word.push_str(&replace_quoted_chars(&token[..token.len() - 1]));
                    if let Some(done) = quoted.take() {
                        words.push(done);
                    }
                } else {
                    word.push_str(&replace_quoted_chars(token));
                }
            }
        }
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_header_line("count= 1000").unwrap(), HeaderLine::Count(1000));
        assert_eq!(parse_header_line("count=12").unwrap(), HeaderLine::Count(12));
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_header_line("  speed= 0.5 ").unwrap(), HeaderLine::Speed(0.5));
    }

    #[test]
    fn test_malformed_number_is_error() {
        assert!(matches!(
            parse_header_line("count= lots"),
            Err(ScriptError::MalformedHeader { .. })
        ));
        assert!(parse_header_line("speed= 1.0x").is_err());
    }

    #[test]
    fn test_markers() {
        assert_eq!(parse_header_line("linebyline").unwrap(), HeaderLine::LineByLine);
        assert_eq!(parse_header_line("start data >>").unwrap(), HeaderLine::StartData);
        assert_eq!(parse_header_line("type= raw events").unwrap(), HeaderLine::Other);
    }

    #[test]
    fn test_parse_directive() {
        let directive = parse_directive("Tap(10, 20 ,300)").unwrap();
        assert_eq!(directive.keyword, "Tap");
        assert_eq!(directive.args, vec!["10", "20", "300"]);

        let directive = parse_directive("LongPress()").unwrap();
        assert_eq!(directive.args, vec![""]);

        assert!(parse_directive("not a directive").is_none());
        assert!(parse_directive("Tap(10, 20").is_none());
    }

    #[test]
    fn test_keyword_substring_match() {
        let directive = parse_directive("captureDispatchPointer(1,2)").unwrap();
        assert!(directive.is("DispatchPointer"));
        assert!(!directive.is("DispatchTrackball"));

        let directive = parse_directive("DispatchPointerEvent(1,2)").unwrap();
        assert!(directive.is("DispatchPointer"));
        assert!(!directive.is("StartCaptureFramerate"));
    }

    #[test]
    fn test_split_plain() {
        assert_eq!(split_command_line("touch  down 10\t20"), vec!["touch", "down", "10", "20"]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(
            split_command_line(r#"type "hello world" now"#),
            vec!["type", "hello world", "now"]
        );
        assert_eq!(split_command_line(r#"type "single""#), vec!["type", "single"]);
        assert_eq!(
            split_command_line(r#"type "say \"hi\" there""#),
            vec!["type", "say \"hi\" there"]
        );
    }

    #[test]
    fn test_split_unterminated_quote_dropped() {
        assert_eq!(split_command_line(r#"type "never closed"#), vec!["type"]);
    }
}
