//! `otp` subcommands.

use anyhow::{Context, Result, bail};
use ring::rand::SystemRandom;
use strongbox_otp::{Algorithm, Generator, OtpParams, ProvisioningUri, SystemClock, Verifier};

use crate::cli::{OtpAction, OtpParamArgs};

fn params(args: &OtpParamArgs) -> Result<OtpParams> {
    let algorithm = Algorithm::parse(&args.algorithm)
        .with_context(|| format!("unsupported algorithm {:?}", args.algorithm))?;
    let params = OtpParams::default()
        .with_algorithm(algorithm)
        .with_digits(args.digits)
        .with_period(args.period);
    params.validate()?;
    Ok(params)
}

pub fn otp(action: OtpAction) -> Result<()> {
    match action {
        OtpAction::Secret => {
            println!("{}", strongbox_otp::secret::generate(&SystemRandom::new())?);
        }

        OtpAction::Generate {
            secret,
            counter,
            params: args,
        } => {
            let params = params(&args)?;
            let generator = Generator::new(SystemClock);
            match counter {
                Some(counter) => println!("{}", generator.hotp(&secret, counter, &params)?),
                None => {
                    let code = generator.totp(&secret, &params)?;
                    println!("{}  (expires in {}s)", code.code, code.remaining_seconds);
                }
            }
        }

        OtpAction::Verify {
            secret,
            code,
            counter,
            window,
            lookahead,
            params: args,
        } => {
            let params = params(&args)?;
            let verifier = Verifier::new(SystemClock);
            match counter {
                Some(counter) => {
                    let result = verifier.verify_hotp(&secret, &code, counter, lookahead, &params)?;
                    match result.new_counter {
                        Some(next) if result.valid => {
                            println!("valid, next counter {next}");
                        }
                        _ => bail!("invalid code"),
                    }
                }
                None => {
                    let result = verifier.verify_totp(&secret, &code, &params, window)?;
                    match result.drift {
                        Some(drift) if result.valid => println!("valid, drift {drift}"),
                        _ => bail!("invalid code"),
                    }
                }
            }
        }

        OtpAction::Uri {
            secret,
            account,
            issuer,
            counter,
            parse,
            params: args,
        } => {
            if parse {
                let uri = ProvisioningUri::parse(&secret)?;
                println!("type       {}", uri.kind.as_str());
                println!("account    {}", uri.account);
                println!("issuer     {}", uri.issuer.as_deref().unwrap_or("-"));
                println!("algorithm  {}", uri.algorithm.as_str());
                println!("digits     {}", uri.digits);
                println!("period     {}", uri.period);
                println!("counter    {}", uri.counter);
                return Ok(());
            }

            if account.is_empty() {
                bail!("--account is required to build a URI");
            }
            let uri = match counter {
                Some(counter) => ProvisioningUri::hotp(account, secret, counter),
                None => ProvisioningUri::totp(account, secret),
            };
            let uri = match issuer {
                Some(issuer) => uri.with_issuer(issuer),
                None => uri,
            };
            println!("{}", uri.with_params(&params(&args)?).to_uri()?);
        }
    }
    Ok(())
}
