use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(about = "Person detection with DeepStream smart record")]
pub struct MainArgs {
    /// The path to the config file (json, toml or yaml)
    #[clap(long, short)]
    pub config: PathBuf,

    /// The path to a text file containing a list of console commands to
    /// execute at startup
    #[clap(long, short)]
    pub script: Option<PathBuf>,

    /// Run without a display window
    #[clap(long)]
    pub headless: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = MainArgs::parse_from(["smartcam", "-c", "smartcam.json", "--headless"]);

        assert_eq!(args.config, PathBuf::from("smartcam.json"));
        assert!(args.headless);
        assert!(args.script.is_none());
    }

    #[test]
    fn config_is_required() {
        assert!(MainArgs::try_parse_from(["smartcam"]).is_err());
    }
}
