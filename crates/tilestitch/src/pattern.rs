//! File naming templates such as `img_r{row:03}_c{col:03}.tif`.

use std::fmt;

/// Errors produced while parsing a naming template.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("naming pattern is empty")]
    Empty,
    #[error("unbalanced brace at byte {position} in naming pattern {pattern:?}")]
    UnbalancedBrace { pattern: String, position: usize },
    #[error("unknown placeholder {{{name}}} in naming pattern")]
    UnknownPlaceholder { name: String },
    #[error("invalid width {spec:?} for placeholder {{{name}}}")]
    InvalidWidth { name: String, spec: String },
    #[error("naming pattern lacks the {{{name}}} placeholder")]
    MissingPlaceholder { name: &'static str },
    #[error("placeholder {{{name}}} appears more than once")]
    DuplicatePlaceholder { name: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Row,
    Col,
    Channel,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Row => "row",
            Field::Col => "col",
            Field::Channel => "channel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { field: Field, width: Option<usize> },
}

/// Values captured from one file name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatternMatch {
    pub row: i64,
    pub col: i64,
    pub channel: Option<String>,
}

/// Parsed naming template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamePattern {
    template: String,
    segments: Vec<Segment>,
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl NamePattern {
    /// Parse `template`. `{row}` and `{col}` (or `{column}`) are required,
    /// `{channel}` is optional; numeric placeholders accept a width such as `{row:03}`.
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        if template.is_empty() {
            return Err(PatternError::Empty);
        }
        let unbalanced = |position| PatternError::UnbalancedBrace {
            pattern: template.to_string(),
            position,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template.char_indices();
        while let Some((pos, ch)) = rest.next() {
            match ch {
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in rest.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(unbalanced(pos)),
                            _ => body.push(c),
                        }
                    }
                    if !closed {
                        return Err(unbalanced(pos));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_placeholder(&body)?);
                }
                '}' => return Err(unbalanced(pos)),
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for field in [Field::Row, Field::Col, Field::Channel] {
            let count = segments
                .iter()
                .filter(|s| matches!(s, Segment::Field { field: f, .. } if *f == field))
                .count();
            if count > 1 {
                return Err(PatternError::DuplicatePlaceholder { name: field.name() });
            }
            if count == 0 && field != Field::Channel {
                return Err(PatternError::MissingPlaceholder { name: field.name() });
            }
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn has_channel(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Field { field: Field::Channel, .. }))
    }

    /// Match a whole file name. Returns `None` if it does not fit the template.
    pub fn match_name(&self, name: &str) -> Option<PatternMatch> {
        let mut captured = PatternMatch::default();
        match_segments(&self.segments, name, &mut captured).then_some(captured)
    }
}

fn parse_placeholder(body: &str) -> Result<Segment, PatternError> {
    let (name, spec) = match body.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (body, None),
    };
    let field = match name {
        "row" => Field::Row,
        "col" | "column" => Field::Col,
        "channel" => Field::Channel,
        other => {
            return Err(PatternError::UnknownPlaceholder {
                name: other.to_string(),
            })
        }
    };
    let width = match spec {
        None => None,
        Some(spec) => {
            let invalid = || PatternError::InvalidWidth {
                name: name.to_string(),
                spec: spec.to_string(),
            };
            if field == Field::Channel || spec.is_empty() {
                return Err(invalid());
            }
            let digits = spec.strip_prefix('0').unwrap_or(spec);
            match digits.parse::<usize>() {
                Ok(w) if w > 0 => Some(w),
                _ => return Err(invalid()),
            }
        }
    };
    Ok(Segment::Field { field, width })
}

// Backtracking matcher: numeric fields take digits (exactly `width` of them
// when given, longest first otherwise), the channel takes the shortest
// non-empty run that lets the rest match.
fn match_segments(segments: &[Segment], input: &str, out: &mut PatternMatch) -> bool {
    let Some((head, tail)) = segments.split_first() else {
        return input.is_empty();
    };
    match head {
        Segment::Literal(lit) => input
            .strip_prefix(lit.as_str())
            .is_some_and(|rest| match_segments(tail, rest, out)),
        Segment::Field {
            field: Field::Channel,
            ..
        } => {
            for (end, _) in input.char_indices().skip(1).chain([(input.len(), ' ')]) {
                if end == 0 {
                    continue;
                }
                if match_segments(tail, &input[end..], out) {
                    out.channel = Some(input[..end].to_string());
                    return true;
                }
            }
            false
        }
        Segment::Field { field, width } => {
            let available = input.bytes().take_while(u8::is_ascii_digit).count();
            let lengths: Vec<usize> = match width {
                Some(w) if *w <= available => vec![*w],
                Some(_) => Vec::new(),
                None => (1..=available).rev().collect(),
            };
            for len in lengths {
                let Ok(value) = input[..len].parse::<i64>() else {
                    continue;
                };
                if match_segments(tail, &input[len..], out) {
                    match field {
                        Field::Row => out.row = value,
                        _ => out.col = value,
                    }
                    return true;
                }
            }
            false
        }
    }
}
