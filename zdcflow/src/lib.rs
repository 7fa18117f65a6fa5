pub mod processor;

use argh::FromArgs;

#[derive(Debug, FromArgs, Clone)]
/// Convert ZDC digits into raw channel payloads
pub struct Digits2RawArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// digits, zstd compressed JSON lines, one time frame per line
    #[argh(positional)]
    pub input: Option<String>,
    /// raw payload output file
    #[argh(option, short = 'o', default = "String::from(\"zdc.raw\")")]
    pub output: String,
    /// also dump the decoded payloads as tab-separated values
    #[argh(option)]
    pub tsv: Option<String>,
    /// module configuration (JSON), standard mapping if absent
    #[argh(option)]
    pub module_config: Option<String>,
    /// pedestal simulation conditions (JSON)
    #[argh(option)]
    pub sim_condition: Option<String>,
    /// filled bunch crossings, one number per line; all empty if absent
    #[argh(option)]
    pub filling: Option<String>,
    /// triggered readout: do not send data on autotrigger alone
    #[argh(switch, short = 't')]
    pub triggered: bool,
    /// seed of the pedestal noise
    #[argh(option)]
    pub seed: Option<u64>,
}

#[derive(Debug, FromArgs, Clone)]
/// Inter-calibrate the ZDC towers from reconstructed events or binned data
pub struct InterCalibArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// reconstructed events, zstd compressed JSON lines
    #[argh(positional)]
    pub input: Vec<String>,
    /// inter-calibration configuration (JSON)
    #[argh(option, short = 'c')]
    pub config: Option<String>,
    /// use the analog sum as reference
    #[argh(switch)]
    pub cross_check: bool,
    /// binned input, tab-separated tc, t1..t4, trigger class, content
    #[argh(option)]
    pub binned: Option<String>,
    /// name of the binned input (hZNA, hZPA, hZNC, hZPC, hZEM)
    #[argh(option, default = "String::from(\"hZNA\")")]
    pub name: String,
    /// trigger class selected in the binned input
    #[argh(option, default = "0")]
    pub trigger_class: i32,
    /// accumulating threads
    #[argh(option, short = 'j', default = "4")]
    pub threads: usize,
    /// calibration table output, standard output if absent
    #[argh(option, short = 'o')]
    pub output: Option<String>,
    /// prefix of the histogram files, none written if absent
    #[argh(option)]
    pub histos: Option<String>,
}
