/*!
# challenge-response authentication (CRAM-MD5)

the answering side generates a random [`Challenge`] and announces it in
its greeting:

```text
M_NUL "OPT CRAM-MD5-<hex challenge>"
```

the originating side then sends `M_PWD "CRAM-MD5-<hex digest>"` where the
digest is the HMAC-MD5 of the challenge (hex decoded) keyed with the shared
password, instead of the password itself.
*/

use hmac::{digest::InvalidLength, Hmac, Mac};
use md5::Md5;
use rand_core::{CryptoRng, RngCore};
use std::{fmt, str::FromStr};

type HmacMd5 = Hmac<Md5>;

const CRAM_PREFIX: &str = "CRAM-";
const ALGORITHM: &str = "MD5";

/// the random challenge of a CRAM authentication
#[derive(PartialEq, Eq, Clone)]
pub struct Challenge(Vec<u8>);

impl Challenge {
    /// size of the challenges we generate
    pub const SIZE: usize = 16;

    /// generate a new challenge for a session we answer
    pub fn generate<RNG>(rng: &mut RNG) -> Self
    where
        RNG: RngCore + CryptoRng,
    {
        let mut bytes = vec![0; Self::SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// look for a supported challenge in the options of an `OPT` frame
    ///
    /// every option of the form `CRAM-<ALGO[/ALGO...]>-<lowercase hex>` is
    /// considered, the first one listing `MD5` is used.
    ///
    /// ```
    /// # use binkp_network::Challenge;
    /// let challenge = Challenge::from_options("NR CRAM-SHA1/MD5-0a1b2c").unwrap();
    /// assert_eq!(challenge.to_string(), "0a1b2c");
    /// assert!(Challenge::from_options("CRAM-SHA1-0a1b2c").is_none());
    /// ```
    pub fn from_options(options: &str) -> Option<Self> {
        options.split_whitespace().find_map(|option| {
            let (algorithms, challenge) = option.strip_prefix(CRAM_PREFIX)?.rsplit_once('-')?;

            if !algorithms.split('/').any(|algorithm| algorithm == ALGORITHM) {
                tracing::debug!(%algorithms, "unsupported CRAM algorithms");
                return None;
            }

            if challenge.is_empty()
                || challenge
                    .bytes()
                    .any(|b| !matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            {
                return None;
            }

            challenge.parse().ok()
        })
    }

    /// the `OPT` informational text announcing this challenge
    pub fn option(&self) -> String {
        format!("OPT {}{}-{}", CRAM_PREFIX, ALGORITHM, self)
    }

    fn mac(&self, password: &str) -> Result<HmacMd5, InvalidLength> {
        let mut mac = HmacMd5::new_from_slice(password.as_bytes())?;
        mac.update(&self.0);
        Ok(mac)
    }

    /// the `M_PWD` argument proving the knowledge of `password`
    pub fn response(&self, password: &str) -> Result<String, InvalidLength> {
        let digest = self.mac(password)?.finalize().into_bytes();

        Ok(format!(
            "{}{}-{}",
            CRAM_PREFIX,
            ALGORITHM,
            hex::encode(digest)
        ))
    }

    /// check the `M_PWD` argument received from the remote is the
    /// expected response for `password`
    pub fn verify(&self, password: &str, response: &str) -> bool {
        let digest = match response
            .strip_prefix(CRAM_PREFIX)
            .and_then(|r| r.strip_prefix(ALGORITHM))
            .and_then(|r| r.strip_prefix('-'))
            .and_then(|r| hex::decode(r).ok())
        {
            Some(digest) => digest,
            None => return false,
        };

        match self.mac(password) {
            Ok(mac) => mac.verify_slice(&digest).is_ok(),
            Err(_) => false,
        }
    }
}

impl AsRef<[u8]> for Challenge {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Challenge")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl FromStr for Challenge {
    type Err = hex::FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(Self)
    }
}

impl From<Vec<u8>> for Challenge {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
