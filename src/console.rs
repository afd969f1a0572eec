//! The console-mode command interpreter: the subset of commands that drive
//! the transfer coordinator. Everything else a full client would recognise
//! (`ls`, `pwd`, `cd`, ...) is out of scope here and reported as unknown.

use std::path::PathBuf;

/// A parsed console-mode command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Empty line: return to client mode without dispatching anything.
    Noop,
    Quit,
    KermitSend(PathBuf),
    KermitReceive,
    ZmodemSend(Vec<PathBuf>),
    ZmodemReceive,
    XmodemSend(PathBuf),
    XmodemReceive(PathBuf),
    YmodemSend(Vec<PathBuf>),
    YmodemReceive,
    /// Recognised by name but missing a required argument.
    MissingArgument { command: &'static str },
    /// Not one of the commands the core interprets.
    Unknown(String),
}

/// Parse one console-mode input line.
#[must_use]
pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Noop;
    }

    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Command::Noop;
    };
    let args: Vec<&str> = parts.collect();

    match verb {
        "quit" => Command::Quit,
        "skermit" => match args.first() {
            Some(&path) => Command::KermitSend(PathBuf::from(path)),
            None => Command::MissingArgument { command: "skermit" },
        },
        "rkermit" => Command::KermitReceive,
        "sz" => {
            if args.is_empty() {
                Command::MissingArgument { command: "sz" }
            } else {
                Command::ZmodemSend(args.iter().map(PathBuf::from).collect())
            }
        }
        "rz" => Command::ZmodemReceive,
        "sx" => match args.first() {
            Some(&path) => Command::XmodemSend(PathBuf::from(path)),
            None => Command::MissingArgument { command: "sx" },
        },
        "rx" => match args.first() {
            Some(&path) => Command::XmodemReceive(PathBuf::from(path)),
            None => Command::MissingArgument { command: "rx" },
        },
        "sy" => {
            if args.is_empty() {
                Command::MissingArgument { command: "sy" }
            } else {
                Command::YmodemSend(args.iter().map(PathBuf::from).collect())
            }
        }
        "ry" => Command::YmodemReceive,
        other => Command::Unknown(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_line_is_noop() {
        assert_eq!(parse(""), Command::Noop);
        assert_eq!(parse("   "), Command::Noop);
    }

    #[test]
    fn quit_and_rkermit_take_no_arguments() {
        assert_eq!(parse("quit"), Command::Quit);
        assert_eq!(parse("rkermit"), Command::KermitReceive);
    }

    #[test]
    fn skermit_requires_a_path() {
        assert_eq!(
            parse("skermit notes.txt"),
            Command::KermitSend(PathBuf::from("notes.txt"))
        );
        assert_eq!(
            parse("skermit"),
            Command::MissingArgument { command: "skermit" }
        );
    }

    #[test]
    fn sz_accepts_multiple_files() {
        assert_eq!(
            parse("sz a.bin b.bin"),
            Command::ZmodemSend(vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")])
        );
    }

    #[test]
    fn rx_requires_destination_filename() {
        assert_eq!(
            parse("rx incoming.bin"),
            Command::XmodemReceive(PathBuf::from("incoming.bin"))
        );
        assert_eq!(parse("rx"), Command::MissingArgument { command: "rx" });
    }

    #[test]
    fn unrecognised_verb_is_unknown() {
        assert_eq!(parse("ls"), Command::Unknown("ls".to_string()));
    }
}
