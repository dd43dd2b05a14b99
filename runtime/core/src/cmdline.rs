// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2022 Takashi Sakamoto

use {
    super::{LogLevel, RuntimeOperation},
    clap::Parser,
    glib::{Error, FileError},
    iris_protocols::{
        repository::RepositoryError, timing::TimingError, ModeSwitchError, ProtocolError,
        TransportError,
    },
};

pub trait ServiceCmd<A, T, R>: Sized
where
    A: Parser,
    R: RuntimeOperation<T>,
{
    fn params(args: &A) -> (T, Option<LogLevel>);

    fn run() {
        let code = A::try_parse()
            .map_err(|err| err.to_string())
            .map(|args| Self::params(&args))
            .and_then(|(params, log_level)| {
                R::new(params, log_level)
                    .and_then(|mut runtime| {
                        runtime.listen()?;
                        runtime.run()?;
                        Ok(libc::EXIT_SUCCESS)
                    })
                    .map_err(|err| specific_err_to_string(&err))
            })
            .unwrap_or_else(|msg| {
                eprintln!("{}", msg);
                libc::EXIT_FAILURE
            });

        std::process::exit(code)
    }
}

pub fn specific_err_to_string(e: &Error) -> String {
    let (domain, cause) = if let Some(error) = e.kind::<FileError>() {
        (
            "Linux file operation error",
            match error {
                FileError::Acces => "Access permission",
                FileError::Isdir => "Is directory",
                FileError::Noent => "Not exists",
                _ => "",
            },
        )
    } else if let Some(error) = e.kind::<TransportError>() {
        (
            "Co-processor transaction error",
            match error {
                TransportError::NoResponse => "No response from co-processor",
                TransportError::ErrorFlagSet => "Co-processor reports error",
                TransportError::ShortFrame => "Response without data",
                _ => "",
            },
        )
    } else if let Some(error) = e.kind::<ModeSwitchError>() {
        (
            "Mode switch error",
            match error {
                ModeSwitchError::TransitionFailed => "Co-processor is not ready after retries",
                ModeSwitchError::Cancelled => "Transition is cancelled",
                ModeSwitchError::Rejected => "Transition is not allowed",
                _ => "",
            },
        )
    } else if let Some(error) = e.kind::<RepositoryError>() {
        (
            "Configuration error",
            match error {
                RepositoryError::NotConfigured => "Option is not configured",
                RepositoryError::Malformed => "Sequence of commands is malformed",
                RepositoryError::OutOfRange => "Index of payload is out of range",
                _ => "",
            },
        )
    } else if let Some(error) = e.kind::<TimingError>() {
        (
            "Timing switch error",
            match error {
                TimingError::TimingNotFound => "Timing is not in table",
                _ => "",
            },
        )
    } else if e.is::<ProtocolError>() {
        ("Protocol violation", "")
    } else {
        ("Unknown domain error", "")
    };
    format!("{}: {}, {}", domain, cause, e)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_message_by_domain() {
        let err = Error::new(TransportError::NoResponse, "poll budget exhausted");
        assert_eq!(
            specific_err_to_string(&err),
            "Co-processor transaction error: No response from co-processor, poll budget exhausted"
        );

        let err = Error::new(ProtocolError::ExceedSplitSize, "frame");
        assert_eq!(specific_err_to_string(&err), "Protocol violation: , frame");

        let err = Error::new(TimingError::TimingNotFound, "720p");
        assert_eq!(
            specific_err_to_string(&err),
            "Timing switch error: Timing is not in table, 720p"
        );
    }
}
