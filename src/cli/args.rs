use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "derep-pipelines",
    version,
    about = "Joins paired-end reads per lane and builds per-sample unique-sequence count tables."
)]
pub struct Arguments {

    #[arg(short = 'i', long = "input", help = "Directory holding <sample>_S#_L00#_R#_001.fastq[.gz] files from every lane.")]
    pub input_dir: String,

    #[arg(short = 'o', long = "output", help = "Output directory. Relative paths are placed under the input directory. Defaults to '<input>/pipeline.output'.")]
    pub out_dir: Option<String>,

    #[arg(short = 'p', long = "forward-primer")]
    pub forward_primer: Option<String>,

    #[arg(short = 'q', long = "reverse-primer")]
    pub reverse_primer: Option<String>,

    #[arg(short = 'T', long = "threads", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub threads: u32,

    #[arg(short = 'r', long = "retain-lanes", action, help = "Keep the per-lane outputs under individual.lanes/")]
    pub retain_lanes: bool,

    #[arg(short = 'a', long = "translate", action, help = "Translate nucleotide counts to amino acids and re-count")]
    pub translate: bool,

    #[arg(short = 'e', long = "extra-flags", allow_hyphen_values = true, help = "Extra flags for the join utility, quoted (e.g. \"-l 50\"). A flag given here replaces the built-in default for it.")]
    pub extra_flags: Option<String>,

    #[arg(long, default_value = "pandaseq")]
    pub join_program: String,

    #[arg(long, default_value = "translator.py", help = "Program line for the nucleotide to amino-acid translator; the counts file name is appended.")]
    pub translator: String,

    #[arg(long, help = "Program line for the sequence naming stage; '-file <counts file>' is appended. Counts are kept in place when unset.")]
    pub identity_cmd: Option<String>,

    #[arg(long, default_value_t = 86_400)]
    pub tool_timeout_secs: u64,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,
}

impl Arguments {
    /// Both primers, or neither. A lone primer cannot drive extraction.
    pub fn primers(&self) -> Option<(&str, &str)> {
        match (self.forward_primer.as_deref(), self.reverse_primer.as_deref()) {
            (Some(f), Some(r)) if !f.is_empty() && !r.is_empty() => Some((f, r)),
            _ => None,
        }
    }
}
