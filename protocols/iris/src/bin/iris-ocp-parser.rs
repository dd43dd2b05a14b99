// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    glib::Error,
    iris_protocols::{dsi::*, ocp::*, ProtocolError},
};

fn operation_to_string(operation: &OcpOperation) -> &'static str {
    match operation {
        OcpOperation::SingleWriteByteMask => "single-write-bytemask",
        OcpOperation::SingleWriteBitMask => "single-write-bitmask",
        OcpOperation::BurstWrite => "burst-write",
        OcpOperation::SingleRead => "single-read",
    }
}

fn parse_word(arg: &str) -> Result<u32, String> {
    let literal = arg.trim_start_matches("0x");
    u32::from_str_radix(literal, 16).map_err(|e| format!("Invalid hexadecimal {}: {}", arg, e))
}

fn print_frame(frame: &OcpFrame) {
    println!("OCP frame:");
    println!("  operation:        {}", operation_to_string(&frame.operation));
    println!("  address:          0x{:08x}", frame.address);
    println!("  length:           {}", frame.encoded_len());

    let writes = frame.register_writes();
    if writes.len() > 0 {
        println!("  register writes:");
        writes.iter().for_each(|(addr, val)| {
            println!("    0x{:08x}: 0x{:08x}", addr, val);
        });
    }
}

fn print_response(word: u32) -> Result<(), Error> {
    let header = ResponseHeader::parse(word)?;
    println!("Response:");
    println!("  tag:              0x{:02x}", header.tag);
    println!("  offset:           {}", header.offset);
    println!("  length:           {}", header.length);
    println!("  additional words: {}", header.additional_words());
    Ok(())
}

fn error_to_string(e: &Error) -> String {
    let cause = match e.kind::<ProtocolError>() {
        Some(error) => error.to_string(),
        None => "unknown".to_string(),
    };
    format!("{}: {}", cause, e)
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let code = args
        .first()
        .ok_or("At least one argument is required".to_string())
        .and_then(|first| {
            if first == "--response" {
                args.get(1)
                    .ok_or("The word of response is required".to_string())
                    .and_then(|arg| parse_word(arg))
                    .and_then(|word| print_response(word).map_err(|e| error_to_string(&e)))
            } else {
                let words = args
                    .iter()
                    .map(|arg| parse_word(arg))
                    .collect::<Result<Vec<u32>, String>>()?;
                let raw: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
                OcpFrame::parse(&raw)
                    .map(|frame| print_frame(&frame))
                    .map_err(|e| error_to_string(&e))
            }
        })
        .map(|_| 0)
        .unwrap_or_else(|msg| {
            eprintln!("{}", msg);
            print_help();
            1
        });

    std::process::exit(code)
}

fn print_help() {
    print!(
        r###"
Usage:
  iris-ocp-parser WORD...
  iris-ocp-parser --response WORD

  where:
    WORD: the quadlet of OCP frame or response in hexadecimal, in order of transmission
"###
    );
}
