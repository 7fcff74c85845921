//! Algorithm negotiation (§3 "Algorithm proposal", §8 "Negotiation" law) and the
//! concrete algorithm implementations each proposal slot can resolve to.

pub mod cipher;
pub mod compress;
pub mod mac;

pub use cipher::Cipher;
pub use compress::CompressionAlgorithm;
pub use mac::Mac;

use crate::error::{Error, Result};
use crate::message::KexInit;

/// The algorithms in effect for one direction of the transport.
#[derive(Debug, Clone, Default)]
pub struct AlgoSet {
    pub cipher: Cipher,
    pub mac: Mac,
    pub compression: CompressionAlgorithm,
}

/// The result of negotiating a pair of `KEXINIT` proposals (§3, §8).
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub kex_algorithm: String,
    pub host_key_algorithm: String,
    pub client_to_server: AlgoSet,
    pub server_to_client: AlgoSet,
}

/// Picks the first element of `client` that also occurs in `server`, per slot.
///
/// This is the one negotiation rule the whole transport relies on (§8 "Negotiation"):
/// whichever side is "client" for a given name-list pair always wins ties.
pub fn preferred_in<'c>(client: &'c [String], server: &[String]) -> Option<&'c str> {
    client
        .iter()
        .find(|candidate| server.iter().any(|s| s == *candidate))
        .map(String::as_str)
}

fn negotiate_namelist<T: std::str::FromStr>(
    client: &[String],
    server: &[String],
    err: Error,
) -> Result<(String, T)> {
    let name = preferred_in(client, server).ok_or_else(|| err.clone())?;
    let algo = name.parse().map_err(|_| err)?;
    Ok((name.to_string(), algo))
}

/// Negotiate every slot of a `KEXINIT` pair. `client`/`server` are from the perspective
/// of whichever side calls this -- the local proposal is always `client` here, matching
/// the "first element of C that occurs in S" rule regardless of which TCP endpoint that
/// maps to.
pub fn negotiate(local: &KexInit, remote: &KexInit) -> Result<Negotiated> {
    let no_common_kex = Error::KexFailed("no common kex algorithm".into());
    let no_common_hostkey = Error::KexFailed("no common host key algorithm".into());
    let no_common_cipher = Error::KexFailed("no common cipher algorithm".into());
    let no_common_mac = Error::KexFailed("no common mac algorithm".into());
    let no_common_compress = Error::KexFailed("no common compression algorithm".into());

    let kex_algorithm = preferred_in(&local.kex_algorithms, &remote.kex_algorithms)
        .ok_or(no_common_kex)?
        .to_string();
    let host_key_algorithm =
        preferred_in(&local.server_host_key_algorithms, &remote.server_host_key_algorithms)
            .ok_or(no_common_hostkey)?
            .to_string();

    let (_, c2s_cipher) = negotiate_namelist::<Cipher>(
        &local.encryption_algorithms_client_to_server,
        &remote.encryption_algorithms_client_to_server,
        no_common_cipher.clone(),
    )?;
    let (_, s2c_cipher) = negotiate_namelist::<Cipher>(
        &local.encryption_algorithms_server_to_client,
        &remote.encryption_algorithms_server_to_client,
        no_common_cipher,
    )?;
    let (_, c2s_mac) = negotiate_namelist::<Mac>(
        &local.mac_algorithms_client_to_server,
        &remote.mac_algorithms_client_to_server,
        no_common_mac.clone(),
    )?;
    let (_, s2c_mac) = negotiate_namelist::<Mac>(
        &local.mac_algorithms_server_to_client,
        &remote.mac_algorithms_server_to_client,
        no_common_mac,
    )?;
    let (_, c2s_compress) = negotiate_namelist::<CompressionAlgorithm>(
        &local.compression_algorithms_client_to_server,
        &remote.compression_algorithms_client_to_server,
        no_common_compress.clone(),
    )?;
    let (_, s2c_compress) = negotiate_namelist::<CompressionAlgorithm>(
        &local.compression_algorithms_server_to_client,
        &remote.compression_algorithms_server_to_client,
        no_common_compress,
    )?;

    Ok(Negotiated {
        kex_algorithm,
        host_key_algorithm,
        client_to_server: AlgoSet {
            cipher: c2s_cipher,
            mac: c2s_mac,
            compression: c2s_compress,
        },
        server_to_client: AlgoSet {
            cipher: s2c_cipher,
            mac: s2c_mac,
            compression: s2c_compress,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_first_client_entry_present_on_server() {
        let client = names(&["aes128-ctr", "aes128-cbc", "none"]);
        let server = names(&["none", "aes128-cbc"]);

        assert_eq!(preferred_in(&client, &server), Some("aes128-cbc"));
    }

    #[test]
    fn empty_intersection_negotiates_to_none() {
        let client = names(&["aes256-ctr"]);
        let server = names(&["aes128-cbc"]);

        assert_eq!(preferred_in(&client, &server), None);
    }

    #[test]
    fn full_negotiation_fails_fatally_without_common_kex() {
        let mut local = KexInit {
            kex_algorithms: names(&["diffie-hellman-group14-sha1"]),
            server_host_key_algorithms: names(&["ssh-rsa"]),
            encryption_algorithms_client_to_server: names(&["aes128-cbc"]),
            encryption_algorithms_server_to_client: names(&["aes128-cbc"]),
            mac_algorithms_client_to_server: names(&["hmac-sha1"]),
            mac_algorithms_server_to_client: names(&["hmac-sha1"]),
            compression_algorithms_client_to_server: names(&["none"]),
            compression_algorithms_server_to_client: names(&["none"]),
            ..Default::default()
        };
        let remote = local.clone();
        local.kex_algorithms = names(&["diffie-hellman-group1-sha1"]);

        assert!(negotiate(&local, &remote).is_err());
    }
}
