use chaintoken::config::VerifierConfig;
use chaintoken::store::{Fingerprint, MemoKeyCache, MemoTrustAnchorStore};
use chaintoken::token::{FileFetcher, TokenVerifier, Verdict};
use clap::Parser;
use openssl::x509::X509;
use std::error::Error;
use std::fs;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
enum ChainTokenCli {
    Verify(VerifyArgs),
    Fingerprint(FingerprintArgs),
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Verify the supplied token by walking its trust chain from a \
    matching trust anchor down to the token signer")]
struct VerifyArgs {
    #[arg(short, long, default_value = "token.jwt")]
    token: String,

    #[arg(short = 'a', long, default_value = "tastore.json")]
    tastore: String,

    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Print the x5t#S256 fingerprint of the public key in the supplied \
    certificate (PEM or DER)")]
struct FingerprintArgs {
    #[arg(short, long, default_value = "cert.pem")]
    cert: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match ChainTokenCli::parse() {
        ChainTokenCli::Verify(args) => match verify(&args) {
            Ok(Verdict::Trusted(t)) => println!("verification successful: signer {}", t.identity),
            Ok(Verdict::Untrusted(e)) => {
                eprintln!("verification failed: {e}");
                std::process::exit(1)
            }
            Err(e) => {
                eprintln!("verification failed: {e}");
                std::process::exit(2)
            }
        },

        ChainTokenCli::Fingerprint(args) => match fingerprint(&args) {
            Ok(fp) => println!("{fp}"),
            Err(e) => {
                eprintln!("fingerprint computation failed: {e}");
                std::process::exit(2)
            }
        },
    }
}

fn verify(args: &VerifyArgs) -> Result<Verdict, Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => VerifierConfig::load_json(&fs::read_to_string(path)?)?,
        None => Default::default(),
    };

    let j = fs::read_to_string(&args.tastore)?;

    let mut tas: MemoTrustAnchorStore = Default::default();
    tas.load_json(&j)?;

    let cache = MemoKeyCache::with_capacity(config.cache_capacity);

    let token = fs::read_to_string(&args.token)?;

    let v = TokenVerifier::new(&tas, &cache)
        .with_config(config)
        .with_fetcher(&FileFetcher)
        .verify(token.trim());

    Ok(v)
}

fn fingerprint(args: &FingerprintArgs) -> Result<Fingerprint, Box<dyn Error>> {
    let c: Vec<u8> = fs::read(&args.cert)?;

    let cert = X509::from_der(&c).or_else(|_| X509::from_pem(&c))?;

    let pkey = cert.public_key()?;
    let fp = Fingerprint::of(&pkey)?;

    Ok(fp)
}
