//! malwi-reloc: inspect how an ARM64 prologue would be relocated.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::debug;

use malwi_relocator::{can_relocate, try_relocate, Arm64Writer, InputCode, Reg, RelocatorConfig};

#[derive(Parser)]
#[command(name = "malwi-reloc")]
#[command(version, about = "Relocate ARM64 prologue instructions", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether enough whole instructions are available
    Check {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Relocate instructions and print the emitted code
    Relocate {
        #[command(flatten)]
        input: InputArgs,

        /// Address the relocated code will execute at
        #[arg(long, value_name = "ADDR", value_parser = parse_u64, default_value = "0")]
        dest_pc: u64,

        /// Align the ADRP base down to its 4 KiB page
        #[arg(long)]
        align_adrp: bool,

        /// Append a jump back to the first unrelocated instruction
        #[arg(long)]
        trampoline: bool,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Address the input executes at in its original location
    #[arg(long, value_name = "ADDR", value_parser = parse_u64, default_value = "0")]
    pc: u64,

    /// Minimum number of bytes to relocate
    #[arg(short, long, value_name = "N", default_value = "16")]
    min_bytes: usize,

    /// Instruction words in hex, in execution order
    #[arg(required = true, value_name = "WORD", value_parser = parse_u32)]
    words: Vec<u32>,
}

impl InputArgs {
    fn code(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

fn hex_digits(s: &str) -> String {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    digits.replace('_', "")
}

fn parse_u64(s: &str) -> Result<u64> {
    u64::from_str_radix(&hex_digits(s), 16).with_context(|| format!("invalid address: {s}"))
}

fn parse_u32(s: &str) -> Result<u32> {
    u32::from_str_radix(&hex_digits(s), 16).with_context(|| format!("invalid instruction word: {s}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Check { input } => {
            let code = input.code();
            let ok = can_relocate(InputCode::new(&code, input.pc), input.min_bytes);
            println!("{}", if ok { "relocatable" } else { "not relocatable" });
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Relocate {
            input,
            dest_pc,
            align_adrp,
            trampoline,
        } => {
            let mut config = RelocatorConfig::from_env();
            config.align_adrp_page |= align_adrp;
            debug!("config: {:?}", config);

            let code = input.code();
            // Worst case is 16 bytes per instruction, plus the 16-byte jump back.
            let mut buf = vec![0u8; code.len() * 4 + 16];
            let mut w = Arm64Writer::new(&mut buf, dest_pc);

            let consumed = try_relocate(InputCode::new(&code, input.pc), input.min_bytes, &mut w, &config)
                .context("relocation failed")?;

            if trampoline {
                w.put_ldr_br_address(Reg::X16, input.pc.wrapping_add(consumed as u64));
            }

            println!("consumed {consumed} bytes, emitted {} bytes", w.offset());
            for line in format_code(w.code(), dest_pc)? {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn format_code(code: &[u8], pc: u64) -> Result<Vec<String>> {
    if code.len() % 4 != 0 {
        bail!("emitted code is not word aligned ({} bytes)", code.len());
    }
    Ok(code
        .chunks_exact(4)
        .enumerate()
        .map(|(i, chunk)| {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            format!("{:#014x}: {:08x}", pc.wrapping_add((i as u64) * 4), word)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_words() {
        assert_eq!(parse_u32("0xD503201F").unwrap(), 0xD503_201F);
        assert_eq!(parse_u32("0Xd503201f").unwrap(), 0xD503_201F);
        assert_eq!(parse_u32("d503_201f").unwrap(), 0xD503_201F);
        assert_eq!(parse_u64("0x10_0000").unwrap(), 0x10_0000);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(parse_u64("0x").is_err());
        assert!(parse_u32("").is_err());
        assert!(parse_u32("zz").is_err());
        assert!(parse_u32("0x0x10").is_err());
        assert!(parse_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn formats_words_with_addresses() {
        let code: Vec<u8> = [0xD503_201Fu32, 0x5800_0050]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        assert_eq!(
            format_code(&code, 0x2000).unwrap(),
            vec!["0x000000002000: d503201f", "0x000000002004: 58000050"]
        );
    }

    #[test]
    fn addresses_wrap_at_top_of_memory() {
        let code = [0u8; 8];
        let lines = format_code(&code, u64::MAX - 3).unwrap();
        assert_eq!(lines[1], "0x000000000000: 00000000");
    }

    #[test]
    fn unaligned_code_is_rejected() {
        assert!(format_code(&[0u8; 6], 0).is_err());
    }
}
