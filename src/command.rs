//! Operator commands, parsed from one line of input.

use anyhow::{anyhow, Context, Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq)]
pub enum OperatorCommand {
    /// Validate and save immediately.
    Submit,
    /// Capture a preview for confirmation.
    Preview,
    Confirm,
    Cancel,
    /// Open the audit log with the platform file opener.
    OpenRecords,
    SetConfidence(f32),
    SetTracking(bool),
    ToggleFullscreen,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  submit | s            save photo and record if the kit is complete
  preview | p           capture a preview for confirmation
  confirm | y           save the pending preview
  cancel | n            discard the pending preview
  records | open        open the submission log
  confidence <0..1>     set the confidence threshold
  tracking on|off       toggle object tracking
  fullscreen | f        toggle fullscreen
  status                show current detection status
  help | ?              show this help
  quit | q              exit";

impl FromStr for OperatorCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(anyhow!("too many arguments for '{}'", verb));
        }

        let command = match (verb.as_str(), arg) {
            ("submit" | "s", None) => OperatorCommand::Submit,
            ("preview" | "p", None) => OperatorCommand::Preview,
            ("confirm" | "y", None) => OperatorCommand::Confirm,
            ("cancel" | "n", None) => OperatorCommand::Cancel,
            ("records" | "open", None) => OperatorCommand::OpenRecords,
            ("confidence" | "conf", Some(value)) => {
                let value: f32 = value
                    .parse()
                    .with_context(|| format!("invalid confidence '{}'", value))?;
                OperatorCommand::SetConfidence(value)
            }
            ("tracking", Some(value)) => OperatorCommand::SetTracking(parse_switch(value)?),
            ("fullscreen" | "f", None) => OperatorCommand::ToggleFullscreen,
            ("status", None) => OperatorCommand::Status,
            ("help" | "?", None) => OperatorCommand::Help,
            ("quit" | "q" | "exit", None) => OperatorCommand::Quit,
            ("confidence" | "conf" | "tracking", None) => {
                return Err(anyhow!("'{}' needs a value", verb))
            }
            (_, Some(_)) if is_known(&verb) => {
                return Err(anyhow!("'{}' takes no arguments", verb))
            }
            _ => return Err(anyhow!("unknown command '{}' (try 'help')", verb)),
        };
        Ok(command)
    }
}

fn is_known(verb: &str) -> bool {
    matches!(
        verb,
        "submit" | "s" | "preview" | "p" | "confirm" | "y" | "cancel" | "n" | "records" | "open"
            | "fullscreen" | "f" | "status" | "help" | "?" | "quit" | "q" | "exit"
    )
}

fn parse_switch(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => Err(anyhow!("expected on/off, got '{}'", other)),
    }
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorCommand::Submit => write!(f, "submit"),
            OperatorCommand::Preview => write!(f, "preview"),
            OperatorCommand::Confirm => write!(f, "confirm"),
            OperatorCommand::Cancel => write!(f, "cancel"),
            OperatorCommand::OpenRecords => write!(f, "records"),
            OperatorCommand::SetConfidence(v) => write!(f, "confidence {}", v),
            OperatorCommand::SetTracking(on) => {
                write!(f, "tracking {}", if *on { "on" } else { "off" })
            }
            OperatorCommand::ToggleFullscreen => write!(f, "fullscreen"),
            OperatorCommand::Status => write!(f, "status"),
            OperatorCommand::Help => write!(f, "help"),
            OperatorCommand::Quit => write!(f, "quit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbs_and_aliases() -> Result<()> {
        assert_eq!("submit".parse::<OperatorCommand>()?, OperatorCommand::Submit);
        assert_eq!(" S ".parse::<OperatorCommand>()?, OperatorCommand::Submit);
        assert_eq!("q".parse::<OperatorCommand>()?, OperatorCommand::Quit);
        assert_eq!(
            "confidence 0.45".parse::<OperatorCommand>()?,
            OperatorCommand::SetConfidence(0.45)
        );
        assert_eq!(
            "tracking ON".parse::<OperatorCommand>()?,
            OperatorCommand::SetTracking(true)
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert!("".parse::<OperatorCommand>().is_err());
        assert!("launch".parse::<OperatorCommand>().is_err());
        assert!("confidence".parse::<OperatorCommand>().is_err());
        assert!("confidence high".parse::<OperatorCommand>().is_err());
        assert!("tracking maybe".parse::<OperatorCommand>().is_err());
        assert!("submit now".parse::<OperatorCommand>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() -> Result<()> {
        for cmd in [
            OperatorCommand::Preview,
            OperatorCommand::SetTracking(false),
            OperatorCommand::OpenRecords,
        ] {
            assert_eq!(cmd.to_string().parse::<OperatorCommand>()?, cmd);
        }
        Ok(())
    }
}
