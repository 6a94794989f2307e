//! Output line formatting and delivery for the monitor binary.
//!
//! A [`Template`] is a string of field letters and `\` markup:
//!
//! | token | output |
//! |-------|--------|
//! | `T` | ` Temp: 21.50` |
//! | `H` | ` Humidity: 45.00` |
//! | `P` | ` Pressure: 1013.25` (hPa) |
//! | `M` | ` Height: 12.30` (m) |
//! | `R` | ` Resistance: 120` (kΩ) |
//! | `D` | ` Dewpoint: 9.26` |
//! | `\l` | local time, `Thu Oct 16 09:05:01 2026` |
//! | `\t` `\s` `\n` | tab, space, newline |
//! | `\,` `\;` | comma, semicolon |
//! | `\\x` | the character `x` |
//!
//! Every rendered line ends with a newline.

use core::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use log::debug;

use crate::session::Reading;

const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

const YELLOW: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// A template that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A character that is neither a field letter nor markup.
    IllegalCharacter { ch: char, position: usize },
    /// The template ends inside an escape sequence.
    DanglingEscape,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::IllegalCharacter { ch, position } => {
                write!(f, "illegal character '{}' at position {}", ch, position)
            }
            TemplateError::DanglingEscape => f.write_str("template ends with an open escape"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Values available to a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    /// °C
    pub temperature: f32,
    /// %RH
    pub humidity: f32,
    /// Pa
    pub pressure: f32,
    /// m, NaN without a sea-level reference.
    pub height: f32,
    /// Ω
    pub gas_resistance: u32,
    /// °C
    pub dew_point: f32,
}

impl Report {
    /// Derives height (when a sea-level pressure in Pa is given) and dew point
    /// from `reading`.
    pub fn new(reading: &Reading, sea_level_pa: Option<f32>) -> Self {
        let height = match sea_level_pa {
            Some(sea_level) => crate::derived::altitude(reading.pressure, sea_level),
            None => f32::NAN,
        };

        Report {
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
            height,
            gas_resistance: reading.gas_resistance,
            dew_point: reading.dew_point(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Temperature,
    Humidity,
    Pressure,
    Height,
    Resistance,
    DewPoint,
    Timestamp,
    Literal(char),
}

/// Parsed output template. The default renders the fixed line
/// `Temp: ..\tHumidity: ..\tpressure: ..\t gas resistance .. Kohm`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    tokens: Option<Vec<Token>>,
}

impl Template {
    /// Parses `source`. An empty string gives the default line.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        if source.is_empty() {
            return Ok(Template::default());
        }

        let mut tokens = Vec::new();
        let mut chars = source.chars().enumerate();
        while let Some((position, ch)) = chars.next() {
            let token = match ch {
                'T' => Token::Temperature,
                'H' => Token::Humidity,
                'P' => Token::Pressure,
                'M' => Token::Height,
                'R' => Token::Resistance,
                'D' => Token::DewPoint,
                '\\' => match chars.next() {
                    Some((_, 'l')) => Token::Timestamp,
                    Some((_, 't')) => Token::Literal('\t'),
                    Some((_, 's')) => Token::Literal(' '),
                    Some((_, 'n')) => Token::Literal('\n'),
                    Some((_, ',')) => Token::Literal(','),
                    Some((_, ';')) => Token::Literal(';'),
                    Some((_, '\\')) => match chars.next() {
                        Some((_, literal)) => Token::Literal(literal),
                        None => return Err(TemplateError::DanglingEscape),
                    },
                    Some((position, ch)) => {
                        return Err(TemplateError::IllegalCharacter { ch, position })
                    }
                    None => return Err(TemplateError::DanglingEscape),
                },
                _ => return Err(TemplateError::IllegalCharacter { ch, position }),
            };
            tokens.push(token);
        }

        debug!("output template: {:?}", tokens);
        Ok(Template {
            tokens: Some(tokens),
        })
    }

    pub fn is_default(&self) -> bool {
        self.tokens.is_none()
    }

    /// Renders `report` with the current local time.
    pub fn render(&self, report: &Report) -> String {
        self.render_at(report, Local::now().naive_local())
    }

    /// Renders `report` using `now` for the timestamp markup.
    pub fn render_at(&self, report: &Report, now: NaiveDateTime) -> String {
        let tokens = match &self.tokens {
            Some(tokens) => tokens,
            None => {
                return format!(
                    "Temp: {:.2}\tHumidity: {:.2}\tpressure: {:.2}\t gas resistance {} Kohm\n",
                    report.temperature,
                    report.humidity,
                    report.pressure / 100.0,
                    report.gas_resistance / 1000
                )
            }
        };

        let mut line = String::new();
        for token in tokens {
            match token {
                Token::Temperature => line += &format!(" Temp: {:.2}", report.temperature),
                Token::Humidity => line += &format!(" Humidity: {:.2}", report.humidity),
                Token::Pressure => line += &format!(" Pressure: {:.2}", report.pressure / 100.0),
                Token::Height => line += &format!(" Height: {:.2}", report.height),
                Token::Resistance => {
                    line += &format!(" Resistance: {}", report.gas_resistance / 1000)
                }
                Token::DewPoint => line += &format!(" Dewpoint: {:.2}", report.dew_point),
                Token::Timestamp => line += &now.format(TIMESTAMP_FORMAT).to_string(),
                Token::Literal(ch) => line.push(*ch),
            }
        }
        line.push('\n');
        line
    }
}

/// Where rendered lines go: the console and optionally an appended file.
#[derive(Debug, Clone, Default)]
pub struct Sink {
    color: bool,
    file: Option<PathBuf>,
}

impl Sink {
    pub fn new(color: bool, file: Option<PathBuf>) -> Self {
        Sink { color, file }
    }

    /// Prints `line` and appends it to the output file, creating the file if
    /// needed.
    pub fn emit(&self, line: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        if self.color {
            write!(stdout, "{}{}{}", YELLOW, line, RESET)?;
        } else {
            stdout.write_all(line.as_bytes())?;
        }
        stdout.flush()?;

        if let Some(path) = &self.file {
            debug!("appending to {}", path.display());
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }
}
