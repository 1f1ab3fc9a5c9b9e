use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use onnx_batchsize::color::error_message;
use onnx_batchsize::{BatchToken, ErrorKind, InitializeOptions, initialize};

#[derive(Debug, PartialEq)]
struct Args {
    /// Model file to load.
    input: PathBuf,

    /// Path to write the updated model to.
    output: PathBuf,

    /// Name for the batch dimension.
    token: String,

    /// Don't print a message when processing completes.
    non_verbose: bool,
}

fn parse_args<I>(args: I) -> Result<Args, lexopt::Error>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    use lexopt::prelude::*;

    let mut input = None;
    let mut output = None;
    let mut token = None;
    let mut non_verbose = false;

    let mut parser = lexopt::Parser::from_args(args);
    while let Some(arg) = parser.next()? {
        match arg {
            Long("input_onnx_file_path") => input = Some(PathBuf::from(parser.value()?)),
            Long("output_onnx_file_path") => output = Some(PathBuf::from(parser.value()?)),
            // Read with `value` rather than `next` so that "-1" is accepted.
            Long("initialization_character_string") => token = Some(parser.value()?.string()?),
            Long("non_verbose") => non_verbose = true,
            Short('h') | Long("help") => {
                println!(
                    "Make the batch dimension of an ONNX model dynamic.

Usage: onnx-batchsize [OPTIONS] --input_onnx_file_path <path> --output_onnx_file_path <path>

  --input_onnx_file_path <path>
      Input ONNX model

  --output_onnx_file_path <path>
      Output ONNX model

  --initialization_character_string <str>
      String to use for the batch dimension, eg. \"-1\", \"N\" or \"batch\"
      [default: {default_token}]

  --non_verbose
      Don't print a message when processing completes

  -h, --help
      Print help
",
                    default_token = BatchToken::DEFAULT,
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let input = input.ok_or("missing `--input_onnx_file_path` arg")?;
    let output = output.ok_or("missing `--output_onnx_file_path` arg")?;

    Ok(Args {
        input,
        output,
        token: token.unwrap_or_else(|| BatchToken::DEFAULT.to_string()),
        non_verbose,
    })
}

/// Replace the batch dimension of an ONNX model with a symbolic name.
///
/// ```text
/// onnx-batchsize \
///   --input_onnx_file_path model.onnx \
///   --output_onnx_file_path model_dynamic.onnx \
///   --initialization_character_string N
/// ```
///
/// Set `RUST_LOG=debug` to log the steps of the conversion.
fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args(std::env::args_os().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            println!("{}", error_message(&err.to_string()));
            return ExitCode::FAILURE;
        }
    };

    let options = InitializeOptions {
        output_path: Some(args.output),
        token: args.token,
        non_verbose: args.non_verbose,
        ..InitializeOptions::from_path(args.input)
    };

    match initialize(options) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) if err.kind() == ErrorKind::Usage => {
            println!("{}", error_message(&err.to_string()));
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{}", error_message(&err.to_string()));
            ExitCode::FAILURE
        }
    }
}
