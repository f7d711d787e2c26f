//! Fork selection and interpreter configuration

use crate::error::ForkError;
use crate::tracer::Tracer;
use std::fmt;

/// Mainnet chain id used by the fixtures
pub const MAINNET_CHAIN_ID: u64 = 1;

/// EIPs that may be enabled on top of a fork with a `+NNNN` suffix
pub const ACTIVATABLE_EIPS: [u32; 6] = [1344, 1884, 3198, 3529, 3855, 3860];

/// Protocol forks, in activation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fork {
    /// Frontier
    Frontier,
    /// Homestead
    Homestead,
    /// Tangerine Whistle
    Eip150,
    /// Spurious Dragon
    Eip158,
    /// Byzantium
    Byzantium,
    /// Constantinople
    Constantinople,
    /// Petersburg (`ConstantinopleFix`)
    Petersburg,
    /// Istanbul
    Istanbul,
    /// Berlin
    Berlin,
    /// London
    London,
    /// The Merge (`Merge` / `Paris`)
    Merge,
    /// Shanghai
    Shanghai,
}

impl Fork {
    /// Parse a fork name as used in fixture `post` sections
    pub fn from_name(name: &str) -> Option<Self> {
        let fork = match name {
            "Frontier" => Self::Frontier,
            "Homestead" => Self::Homestead,
            "EIP150" => Self::Eip150,
            "EIP158" => Self::Eip158,
            "Byzantium" => Self::Byzantium,
            "Constantinople" => Self::Constantinople,
            "ConstantinopleFix" | "Petersburg" => Self::Petersburg,
            "Istanbul" => Self::Istanbul,
            "Berlin" => Self::Berlin,
            "London" => Self::London,
            "Merge" | "Paris" => Self::Merge,
            "Shanghai" => Self::Shanghai,
            _ => return None,
        };
        Some(fork)
    }

    /// Canonical fixture name
    pub fn name(self) -> &'static str {
        match self {
            Self::Frontier => "Frontier",
            Self::Homestead => "Homestead",
            Self::Eip150 => "EIP150",
            Self::Eip158 => "EIP158",
            Self::Byzantium => "Byzantium",
            Self::Constantinople => "Constantinople",
            Self::Petersburg => "ConstantinopleFix",
            Self::Istanbul => "Istanbul",
            Self::Berlin => "Berlin",
            Self::London => "London",
            Self::Merge => "Merge",
            Self::Shanghai => "Shanghai",
        }
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chain parameters selected for one fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Chain id returned by CHAINID and used for replay protection
    pub chain_id: u64,
    /// Active fork
    pub fork: Fork,
}

impl ChainConfig {
    /// Mainnet configuration with `fork` active from genesis
    pub fn new(fork: Fork) -> Self {
        Self {
            chain_id: MAINNET_CHAIN_ID,
            fork,
        }
    }

    /// Rules for this config with additional EIPs enabled
    pub fn rules(&self, extra_eips: &[u32]) -> Rules {
        Rules {
            chain_id: self.chain_id,
            fork: self.fork,
            extra_eips: extra_eips.to_vec(),
        }
    }

    /// Whether empty accounts are deleted at the end of a transaction
    pub fn is_eip158(&self) -> bool {
        self.fork >= Fork::Eip158
    }

    /// Whether a base fee is part of the block
    pub fn is_london(&self) -> bool {
        self.fork >= Fork::London
    }

    /// Whether DIFFICULTY returns the beacon randomness
    pub fn is_merge(&self) -> bool {
        self.fork >= Fork::Merge
    }
}

/// Resolve a fork string such as `"London"` or `"London+3855"`.
///
/// Returns the chain config and the extra EIPs named after `+`.
pub fn chain_config(name: &str) -> Result<(ChainConfig, Vec<u32>), ForkError> {
    let mut parts = name.split('+');
    let base = parts.next().unwrap_or_default();
    let fork = Fork::from_name(base).ok_or_else(|| ForkError::Unsupported(name.to_string()))?;

    let mut eips = Vec::new();
    for part in parts {
        let eip = part
            .parse::<u32>()
            .ok()
            .filter(|eip| ACTIVATABLE_EIPS.contains(eip))
            .ok_or_else(|| ForkError::InvalidEip {
                fork: name.to_string(),
                eip: part.to_string(),
            })?;
        eips.push(eip);
    }
    Ok((ChainConfig::new(fork), eips))
}

/// Feature switches derived from a fork plus extra EIPs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rules {
    /// Chain id
    pub chain_id: u64,
    /// Active fork
    pub fork: Fork,
    extra_eips: Vec<u32>,
}

impl Rules {
    /// Whether `eip` is active, either through the fork or explicitly
    pub fn has_eip(&self, eip: u32) -> bool {
        if self.extra_eips.contains(&eip) {
            return true;
        }
        let since = match eip {
            1344 | 1884 | 2200 => Fork::Istanbul,
            2929 | 2930 => Fork::Berlin,
            1559 | 3198 | 3529 | 3541 => Fork::London,
            3855 | 3860 => Fork::Shanghai,
            _ => return false,
        };
        self.fork >= since
    }

    /// Homestead or later
    pub fn is_homestead(&self) -> bool {
        self.fork >= Fork::Homestead
    }

    /// Tangerine Whistle or later
    pub fn is_eip150(&self) -> bool {
        self.fork >= Fork::Eip150
    }

    /// Spurious Dragon or later
    pub fn is_eip158(&self) -> bool {
        self.fork >= Fork::Eip158
    }

    /// Byzantium or later
    pub fn is_byzantium(&self) -> bool {
        self.fork >= Fork::Byzantium
    }

    /// Constantinople or later
    pub fn is_constantinople(&self) -> bool {
        self.fork >= Fork::Constantinople
    }

    /// Istanbul or later
    pub fn is_istanbul(&self) -> bool {
        self.fork >= Fork::Istanbul
    }

    /// Berlin or later
    pub fn is_berlin(&self) -> bool {
        self.fork >= Fork::Berlin
    }

    /// London or later
    pub fn is_london(&self) -> bool {
        self.fork >= Fork::London
    }

    /// Merge or later
    pub fn is_merge(&self) -> bool {
        self.fork >= Fork::Merge
    }
}

/// Interpreter options
#[derive(Default)]
pub struct VmConfig {
    /// Step tracer; `None` disables tracing
    pub tracer: Option<Box<dyn Tracer>>,
    /// EIPs enabled on top of the fork
    pub extra_eips: Vec<u32>,
}

impl VmConfig {
    /// Config with `tracer` installed
    pub fn with_tracer(tracer: impl Tracer + 'static) -> Self {
        Self {
            tracer: Some(Box::new(tracer)),
            extra_eips: Vec::new(),
        }
    }

    /// Whether a tracer is installed
    pub fn debug(&self) -> bool {
        self.tracer.is_some()
    }
}

impl fmt::Debug for VmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmConfig")
            .field("debug", &self.debug())
            .field("extra_eips", &self.extra_eips)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fork() {
        let (config, eips) = chain_config("Berlin").unwrap();
        assert_eq!(config.fork, Fork::Berlin);
        assert_eq!(config.chain_id, 1);
        assert!(eips.is_empty());
    }

    #[test]
    fn test_fork_aliases() {
        assert_eq!(Fork::from_name("ConstantinopleFix"), Some(Fork::Petersburg));
        assert_eq!(Fork::from_name("Paris"), Some(Fork::Merge));
        assert_eq!(Fork::Petersburg.to_string(), "ConstantinopleFix");
    }

    #[test]
    fn test_fork_with_extra_eips() {
        let (config, eips) = chain_config("London+3855").unwrap();
        assert_eq!(config.fork, Fork::London);
        assert_eq!(eips, vec![3855]);

        let rules = config.rules(&eips);
        assert!(rules.has_eip(3855));
        assert!(!config.rules(&[]).has_eip(3855));
    }

    #[test]
    fn test_unsupported_fork() {
        assert_eq!(
            chain_config("FrontierToHomesteadAt5"),
            Err(ForkError::Unsupported("FrontierToHomesteadAt5".to_string()))
        );
    }

    #[test]
    fn test_invalid_eip_suffix() {
        assert!(matches!(chain_config("Berlin+abc"), Err(ForkError::InvalidEip { .. })));
        assert!(matches!(chain_config("Berlin+9999"), Err(ForkError::InvalidEip { .. })));
    }

    #[test]
    fn test_fork_ordering() {
        let rules = ChainConfig::new(Fork::Istanbul).rules(&[]);
        assert!(rules.is_byzantium());
        assert!(rules.has_eip(1344));
        assert!(!rules.is_berlin());
        assert!(!rules.has_eip(3198));
    }
}
