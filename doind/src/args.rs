use clap::{arg, Arg, ArgAction, Command};

#[derive(Debug)]
pub struct Args {
    pub appdir: Option<String>,
    pub log_level: String,
    pub simnet: bool,
    pub evaluator_domains: Vec<String>,
    pub secret_hex: Option<String>,
}

pub fn cli() -> Command {
    Command::new("doind")
        .about(format!("{} v{}", env!("CARGO_PKG_DESCRIPTION"), env!("CARGO_PKG_VERSION")))
        .version(env!("CARGO_PKG_VERSION"))
        .arg(arg!(-b --appdir <DATA_DIR> "Directory to store data.").required(false))
        .arg(
            Arg::new("log_level")
                .short('d')
                .long("loglevel")
                .value_name("log_level")
                .default_value("info")
                .num_args(0..=1)
                .require_equals(true)
                .help("Specify log level."),
        )
        .arg(Arg::new("simnet").long("simnet").action(ArgAction::SetTrue).help("Use simnet consensus parameters."))
        .arg(
            Arg::new("evaluate")
                .long("evaluate")
                .value_name("domain_id")
                .action(ArgAction::Append)
                .help("Register this node as an evaluator for the given domain (repeatable)."),
        )
        .arg(
            Arg::new("secret")
                .long("secret")
                .value_name("hex32")
                .num_args(0..=1)
                .require_equals(true)
                .help("32-byte identity secret in hex; generated fresh when omitted."),
        )
}

impl Args {
    pub fn parse() -> Args {
        let m = cli().get_matches();
        Args {
            appdir: m.get_one::<String>("appdir").cloned(),
            log_level: m.get_one::<String>("log_level").cloned().unwrap(),
            simnet: m.get_flag("simnet"),
            evaluator_domains: m.get_many::<String>("evaluate").map(|v| v.cloned().collect()).unwrap_or_default(),
            secret_hex: m.get_one::<String>("secret").cloned(),
        }
    }
}
