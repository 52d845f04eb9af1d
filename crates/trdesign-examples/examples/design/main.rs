use anyhow::{bail, Result};
use clap::Parser;
use trdesign::{OptionsUpdate, PrepInputs, Protocol, TrDesign};
use trdesign_examples::descend;

#[derive(Parser, Debug)]
#[command(author, version, about = "Design a sequence against trRosetta predictions")]
struct Args {
    /// Directory holding models/ and bkgr_models/ safetensors
    #[arg(long)]
    data_dir: String,

    /// fixbb, hallucination or partial
    #[arg(long, default_value = "fixbb")]
    protocol: Protocol,

    /// Target structure (fixbb, partial)
    #[arg(long)]
    pdb: Option<String>,

    /// Chains to read from the target, e.g. "A" or "A,B"
    #[arg(long)]
    chain: Option<String>,

    /// Design length (hallucination, partial)
    #[arg(long)]
    length: Option<usize>,

    /// Residues to keep in partial design, e.g. "A1-10,A15"
    #[arg(long)]
    pos: Option<String>,

    /// JSON file with option overrides
    #[arg(long)]
    options: Option<String>,

    #[arg(long, default_value_t = 100)]
    steps: usize,

    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,

    #[arg(long)]
    seed: Option<u64>,

    /// Run on CPU rather than GPU
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let device = trdesign_models::device(args.cpu)?;
    let mut session = TrDesign::from_pretrained(args.protocol, &args.data_dir, &device)?;

    let mut inputs = match &args.pdb {
        Some(pdb) => PrepInputs::with_pdb(pdb, args.chain.as_deref())?,
        None if args.protocol.uses_target() => {
            bail!("--pdb is required for protocol {}", args.protocol)
        }
        None => PrepInputs::default(),
    };
    inputs.length = args.length;
    inputs.pos = args.pos.clone();
    inputs.seed = args.seed;
    inputs.options = args
        .options
        .as_ref()
        .map(OptionsUpdate::from_json_file)
        .transpose()?;
    session.prep_inputs(inputs)?;

    let losses = descend(&mut session, args.steps, args.learning_rate)?;
    if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
        println!("loss {first:.4} -> {last:.4} over {} steps", losses.len());
    }
    println!("seed {}", session.seed());
    println!("{}", session.sequence()?);
    Ok(())
}
