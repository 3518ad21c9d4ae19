//! Operator setup commands; each runs once and exits.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use updaterd_records::extract_header;

use crate::client::{self, Client, SocketKind};
use crate::config::Configuration;
use crate::connector::REQUEST_TIMEOUT;

pub fn usage() -> &'static str {
    "commands:\n\
     \x20 help                          show this list\n\
     \x20 gen-peer-identity             create the peering key pair files\n\
     \x20 block-times FILE BEGIN END    dump block timestamps as CSV"
}

pub fn run(
    command: &str,
    arguments: &[String],
    configuration: &Configuration,
) -> Result<(), String> {
    match command {
        "help" => {
            println!("{}", usage());
            Ok(())
        }
        "gen-peer-identity" => gen_peer_identity(configuration),
        "block-times" => block_times(arguments, configuration),
        other => Err(format!("unknown command: {other:?}")),
    }
}

fn gen_peer_identity(configuration: &Configuration) -> Result<(), String> {
    let keypair = zmq::CurveKeyPair::new().map_err(|error| error.to_string())?;
    write_key_file(&configuration.peering.private_key, &keypair.secret_key)?;
    write_key_file(&configuration.peering.public_key, &keypair.public_key)?;
    println!("public key: {}", hex::encode(keypair.public_key));
    Ok(())
}

fn write_key_file(path: &Path, key: &[u8; 32]) -> Result<(), String> {
    if path.exists() {
        return Err(format!("refusing to overwrite: {path:?}"));
    }
    fs::write(path, format!("{}\n", hex::encode(key)))
        .map_err(|error| format!("write key file: {path:?}  error: {error}"))
}

// fetch a block range from the first peer and write "number,timestamp"
// lines, an operator aid for charting block pacing
fn block_times(arguments: &[String], configuration: &Configuration) -> Result<(), String> {
    let [file, begin, end] = arguments else {
        return Err("usage: block-times FILE BEGIN END".to_string());
    };
    let begin: u64 = begin
        .parse()
        .map_err(|_| format!("invalid begin block: {begin:?}"))?;
    let end: u64 = end.parse().map_err(|_| format!("invalid end block: {end:?}"))?;
    if end < begin {
        return Err("end block is below begin block".to_string());
    }

    let private_key =
        client::read_key_file(&configuration.peering.private_key).map_err(|error| error.to_string())?;
    let public_key =
        client::read_key_file(&configuration.peering.public_key).map_err(|error| error.to_string())?;

    let node = configuration
        .peering
        .nodes
        .first()
        .ok_or("no peers configured")?;
    let server_key =
        client::decode_public_key(&node.public_key).map_err(|error| error.to_string())?;

    let context = zmq::Context::new();
    let mut peer = Client::new(
        &context,
        SocketKind::Request,
        private_key,
        public_key,
        Some(REQUEST_TIMEOUT),
    );
    peer.connect(&node.connect, &server_key)
        .map_err(|error| error.to_string())?;

    let out = fs::File::create(file).map_err(|error| format!("create {file:?}: {error}"))?;
    let mut out = BufWriter::new(out);

    for number in begin..=end {
        let packed =
            crate::connector::block_data(&mut peer, number).map_err(|error| error.to_string())?;
        let (header, _, _) = extract_header(&packed, number).map_err(|error| error.to_string())?;
        writeln!(out, "{number},{}", header.timestamp)
            .map_err(|error| format!("write {file:?}: {error}"))?;
    }
    out.flush().map_err(|error| format!("write {file:?}: {error}"))
}
