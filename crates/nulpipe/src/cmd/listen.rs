use std::io::Read;

use nulpipe_frame::{FrameError, MessageReader};
use tracing::warn;

use crate::cmd::ListenArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let stdin = std::io::stdin().lock();
    listen(stdin, &args, format)?;
    Ok(SUCCESS)
}

/// Print messages until EOF or `--count`. Returns how many were printed.
fn listen<R: Read>(input: R, args: &ListenArgs, format: OutputFormat) -> CliResult<usize> {
    let mut reader = MessageReader::new(input);
    let mut printed = 0usize;

    while args.count.map_or(true, |count| printed < count) {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(frame_error("receive failed", err)),
        };

        printed = printed.saturating_add(1);
        print_message(&message, printed, format);
    }

    if reader.pending_len() > 0 {
        warn!(
            bytes = reader.pending_len(),
            "input ended inside a message; trailing bytes dropped"
        );
    }
    Ok(printed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_end_of_input() {
        let args = ListenArgs { count: None };
        let printed = listen(&b"one\0two\0"[..], &args, OutputFormat::Pretty).unwrap();
        assert_eq!(printed, 2);
    }

    #[test]
    fn stops_after_count() {
        let args = ListenArgs { count: Some(1) };
        let printed = listen(&b"one\0two\0three\0"[..], &args, OutputFormat::Pretty).unwrap();
        assert_eq!(printed, 1);
    }

    #[test]
    fn unterminated_tail_is_not_a_message() {
        let args = ListenArgs { count: None };
        let printed = listen(&b"one\0partial"[..], &args, OutputFormat::Pretty).unwrap();
        assert_eq!(printed, 1);
    }
}
