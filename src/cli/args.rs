//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "docker2aci")]
#[command(about = "Convert a Docker registry image into a chain of ACIs")]
#[command(version)]
pub struct Args {
    /// Image to convert
    #[arg(
        value_name = "[REGISTRYURL/]IMAGE_NAME[:TAG]",
        help = "Image to convert; index and tag default to index.docker.io and latest"
    )]
    pub reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_positional() {
        let args = Args::try_parse_from(["docker2aci", "quay.io/coreos/etcd:v2.0.0"]).unwrap();
        assert_eq!(args.reference, "quay.io/coreos/etcd:v2.0.0");
    }

    #[test]
    fn test_reference_required() {
        assert!(Args::try_parse_from(["docker2aci"]).is_err());
        assert!(Args::try_parse_from(["docker2aci", "a", "b"]).is_err());
    }
}
