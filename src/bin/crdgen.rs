//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of every entity kind as one
//! multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/aqua.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use aqua_operator::crd::{
    AquaCsp, AquaDatabase, AquaEnforcer, AquaGateway, AquaKubeEnforcer, AquaServer,
    AquaStarboard,
};
use kube::core::CustomResourceExt;

fn main() {
    let crds = [
        AquaCsp::crd(),
        AquaDatabase::crd(),
        AquaGateway::crd(),
        AquaServer::crd(),
        AquaEnforcer::crd(),
        AquaKubeEnforcer::crd(),
        AquaStarboard::crd(),
    ];

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Fix schema issues in the Rust types under src/crd/");
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
