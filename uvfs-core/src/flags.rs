//! Symbolic flag resolvers.
//!
//! Both resolvers accept either a symbolic string or a raw integer. Raw
//! integers pass through untouched.

use uvfs_traits::consts::{
    O_APPEND, O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, S_IRGRP, S_IROTH, S_IRUSR,
    S_IWGRP, S_IWOTH, S_IWUSR, S_IXGRP, S_IXOTH, S_IXUSR,
};

/// Flag argument as supplied by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagInput<'a> {
    Symbolic(&'a str),
    Raw(u32),
}

impl<'a> From<&'a str> for FlagInput<'a> {
    fn from(value: &'a str) -> Self {
        FlagInput::Symbolic(value)
    }
}

impl<'a> From<&'a String> for FlagInput<'a> {
    fn from(value: &'a String) -> Self {
        FlagInput::Symbolic(value.as_str())
    }
}

impl From<u32> for FlagInput<'_> {
    fn from(value: u32) -> Self {
        FlagInput::Raw(value)
    }
}

const OPEN_FLAG_MAPPING: [(char, u32); 7] = [
    ('+', O_RDWR),
    ('a', O_APPEND),
    ('c', O_CREAT),
    ('e', O_EXCL),
    ('r', O_RDONLY),
    ('t', O_TRUNC),
    ('w', O_WRONLY),
];

/// Maps `fopen`-like mode characters to native open flags.
///
/// Unknown characters are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlagResolver;

impl OpenFlagResolver {
    pub fn new() -> Self {
        Self
    }

    /// Flags used when the caller supplies none. There are no implicit flags.
    pub fn default_flags(&self) -> Option<u32> {
        None
    }

    pub fn flag_mapping(&self) -> &'static [(char, u32)] {
        &OPEN_FLAG_MAPPING
    }

    pub fn resolve<'a>(&self, flag: impl Into<FlagInput<'a>>) -> u32 {
        match flag.into() {
            FlagInput::Raw(raw) => raw,
            FlagInput::Symbolic(symbols) => {
                let base = self.default_flags().unwrap_or(0);
                symbols.chars().fold(base, |acc, symbol| {
                    OPEN_FLAG_MAPPING
                        .iter()
                        .find(|(key, _)| *key == symbol)
                        .map_or(acc, |(_, bits)| acc | bits)
                })
            }
        }
    }
}

/// Permission scopes in `rwxrwxrwx` order.
const PERMISSION_SCOPES: [[(char, u32); 3]; 3] = [
    // user
    [('r', S_IRUSR), ('w', S_IWUSR), ('x', S_IXUSR)],
    // group
    [('r', S_IRGRP), ('w', S_IWGRP), ('x', S_IXGRP)],
    // universe
    [('r', S_IROTH), ('w', S_IWOTH), ('x', S_IXOTH)],
];

/// Maps a nine character `rwxrwxrwx` string to permission bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionFlagResolver;

impl PermissionFlagResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn default_flags(&self) -> Option<u32> {
        None
    }

    pub fn resolve<'a>(&self, flag: impl Into<FlagInput<'a>>) -> u32 {
        let symbols = match flag.into() {
            FlagInput::Raw(raw) => return raw,
            FlagInput::Symbolic(symbols) => symbols,
        };

        // Walks from the last position to the first; scope is position / 3.
        let chars: Vec<char> = symbols.chars().collect();
        let mut result = 0;
        for position in (0..chars.len()).rev() {
            let Some(scope) = PERMISSION_SCOPES.get(position / 3) else {
                continue;
            };
            if let Some((_, bits)) = scope.iter().find(|(key, _)| *key == chars[position]) {
                result |= bits;
            }
        }
        result
    }
}
