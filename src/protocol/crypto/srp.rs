//! SRP-6a client over the 3072-bit group, as the paired device expects it.
//!
//! The device's reference implementation hashes minimal-length big-endian
//! byte representations (leading zero bytes stripped) of every big integer
//! fed into the session key and proofs. This deviates from the RFC 5054
//! fixed-width padding convention and must not be "corrected": padded
//! encodings produce proofs the device rejects.

use super::CryptoError;
use num_bigint::{BigUint, RandomBits};
use num_traits::Zero;
use rand::Rng;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// SRP client holding our ephemeral secret until the challenge is processed
pub struct SrpClient {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    a: BigUint,
    a_pub: BigUint,
}

impl SrpClient {
    /// Create a client with a fresh ephemeral key pair
    pub fn new() -> Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(
            b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
              8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
              302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
              A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
              49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
              FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
              670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
              180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
              3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D\
              04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D\
              B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226\
              1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
              BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC\
              E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
            16,
        )
        .ok_or_else(|| CryptoError::SrpError("failed to parse group prime".to_string()))?;

        let g = BigUint::from(5u32);

        // k = H(N || g), minimal-length encodings
        let k = {
            let mut hasher = Sha512::new();
            hasher.update(n.to_bytes_be());
            hasher.update(g.to_bytes_be());
            BigUint::from_bytes_be(&hasher.finalize())
        };

        let mut rng = rand::thread_rng();
        let a: BigUint = rng.sample(RandomBits::new(256));
        let a = a % &n;

        let a_pub = g.modpow(&a, &n);

        Ok(Self { n, g, k, a, a_pub })
    }

    /// Our public value A, minimal-length big-endian
    pub fn public_key(&self) -> Vec<u8> {
        self.a_pub.to_bytes_be()
    }

    /// Process the server challenge (salt + B) into a session key and proof
    ///
    /// `identity` is the fixed pairing identity string, `password` the PIN
    /// shown on the device.
    pub fn process_challenge(
        &self,
        identity: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % &self.n).is_zero() {
            return Err(CryptoError::SrpError(
                "server public value is zero mod N".to_string(),
            ));
        }

        // u = H(A || B)
        let u = {
            let mut hasher = Sha512::new();
            hasher.update(self.a_pub.to_bytes_be());
            hasher.update(b_pub.to_bytes_be());
            BigUint::from_bytes_be(&hasher.finalize())
        };
        if u.is_zero() {
            return Err(CryptoError::SrpError("u is zero".to_string()));
        }

        // x = H(salt || H(identity ":" password))
        let x = {
            let mut inner = Sha512::new();
            inner.update(identity);
            inner.update(b":");
            inner.update(password);
            let h_ip = inner.finalize();

            let mut outer = Sha512::new();
            outer.update(salt);
            outer.update(h_ip);
            BigUint::from_bytes_be(&outer.finalize())
        };

        // S = (B - k * g^x) ^ (a + u * x) mod N
        // BigUint has no negative values, so lift B by N before subtracting.
        let g_x = self.g.modpow(&x, &self.n);
        let k_g_x = (&self.k * g_x) % &self.n;
        let base = if b_pub >= k_g_x {
            (&b_pub - &k_g_x) % &self.n
        } else {
            (&self.n - (&k_g_x - &b_pub) % &self.n) % &self.n
        };

        let exp = &self.a + (&u * x);
        let s_shared = base.modpow(&exp, &self.n);

        // K = H(S)
        let k_session = Sha512::digest(s_shared.to_bytes_be()).to_vec();

        // M1 = H((H(N) xor H(g)) || H(identity) || salt || A || B || K)
        let m1 = {
            let hn = Sha512::digest(self.n.to_bytes_be());
            let hg = Sha512::digest(self.g.to_bytes_be());
            let mut hn_xor_hg = [0u8; 64];
            for i in 0..64 {
                hn_xor_hg[i] = hn[i] ^ hg[i];
            }

            let mut hasher = Sha512::new();
            hasher.update(hn_xor_hg);
            hasher.update(Sha512::digest(identity));
            hasher.update(salt);
            hasher.update(self.a_pub.to_bytes_be());
            hasher.update(b_pub.to_bytes_be());
            hasher.update(&k_session);
            hasher.finalize().to_vec()
        };

        Ok(SrpVerifier {
            a_pub: self.a_pub.clone(),
            m1,
            k_session,
        })
    }
}

/// Holds the client proof and session key between M3 and M4
pub struct SrpVerifier {
    a_pub: BigUint,
    m1: Vec<u8>,
    k_session: Vec<u8>,
}

impl SrpVerifier {
    /// Client proof M1 to send with our public value
    pub fn client_proof(&self) -> &[u8] {
        &self.m1
    }

    /// Check the server proof M2 = H(A || M1 || K)
    ///
    /// A mismatch means the PIN was wrong or the exchange desynchronized;
    /// the caller must fail the pairing rather than retry this step.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<SessionKey, CryptoError> {
        let mut hasher = Sha512::new();
        hasher.update(self.a_pub.to_bytes_be());
        hasher.update(&self.m1);
        hasher.update(&self.k_session);
        let expected_m2 = hasher.finalize();

        if expected_m2.as_slice() != server_proof {
            return Err(CryptoError::ProofVerificationFailed);
        }

        Ok(SessionKey {
            key: self.k_session.clone(),
        })
    }
}

/// The 64-byte SRP session key K
pub struct SessionKey {
    key: Vec<u8>,
}

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal SRP server math mirroring the device side, used to exercise
    /// the full exchange without a real accessory.
    struct TestServer {
        n: BigUint,
        b: BigUint,
        b_pub: BigUint,
        v: BigUint,
        salt: Vec<u8>,
    }

    impl TestServer {
        fn new(identity: &[u8], password: &[u8], client: &SrpClient) -> Self {
            let n = client.n.clone();
            let g = client.g.clone();
            let k = client.k.clone();
            let salt = vec![0xAB; 16];

            let x = {
                let mut inner = Sha512::new();
                inner.update(identity);
                inner.update(b":");
                inner.update(password);
                let h_ip = inner.finalize();

                let mut outer = Sha512::new();
                outer.update(&salt);
                outer.update(h_ip);
                BigUint::from_bytes_be(&outer.finalize())
            };
            let v = g.modpow(&x, &n);

            let b = BigUint::from(77777u32);
            // B = k*v + g^b mod N
            let b_pub = (&k * &v + g.modpow(&b, &n)) % &n;

            Self { n, b, b_pub, v, salt }
        }

        fn session_key(&self, client_public: &[u8]) -> Vec<u8> {
            let a_pub = BigUint::from_bytes_be(client_public);
            let u = {
                let mut hasher = Sha512::new();
                hasher.update(a_pub.to_bytes_be());
                hasher.update(self.b_pub.to_bytes_be());
                BigUint::from_bytes_be(&hasher.finalize())
            };
            // S = (A * v^u)^b mod N
            let s = ((&a_pub * self.v.modpow(&u, &self.n)) % &self.n).modpow(&self.b, &self.n);
            Sha512::digest(s.to_bytes_be()).to_vec()
        }
    }

    #[test]
    fn test_client_server_agree_on_session_key() {
        let identity = b"Pair-Setup";
        let password = b"1234";

        let client = SrpClient::new().unwrap();
        let server = TestServer::new(identity, password, &client);

        let verifier = client
            .process_challenge(
                identity,
                password,
                &server.salt,
                &server.b_pub.to_bytes_be(),
            )
            .unwrap();

        let server_k = server.session_key(&client.public_key());

        // Server-computed M2 over the client's proof must verify.
        let a_pub = BigUint::from_bytes_be(&client.public_key());
        let mut hasher = Sha512::new();
        hasher.update(a_pub.to_bytes_be());
        hasher.update(verifier.client_proof());
        hasher.update(&server_k);
        let m2 = hasher.finalize();

        let key = verifier.verify_server(&m2).unwrap();
        assert_eq!(key.as_bytes(), server_k.as_slice());
    }

    #[test]
    fn test_wrong_password_fails_server_proof() {
        let identity = b"Pair-Setup";

        let client = SrpClient::new().unwrap();
        let server = TestServer::new(identity, b"1234", &client);

        let verifier = client
            .process_challenge(identity, b"9999", &server.salt, &server.b_pub.to_bytes_be())
            .unwrap();

        let server_k = server.session_key(&client.public_key());
        let a_pub = BigUint::from_bytes_be(&client.public_key());
        let mut hasher = Sha512::new();
        hasher.update(a_pub.to_bytes_be());
        hasher.update(verifier.client_proof());
        hasher.update(&server_k);
        let m2 = hasher.finalize();

        assert!(matches!(
            verifier.verify_server(&m2),
            Err(CryptoError::ProofVerificationFailed)
        ));
    }

    #[test]
    fn test_zero_server_public_rejected() {
        let client = SrpClient::new().unwrap();
        let result = client.process_challenge(b"Pair-Setup", b"1234", &[0u8; 16], &[0u8; 384]);
        assert!(matches!(result, Err(CryptoError::SrpError(_))));
    }

    #[test]
    fn test_public_key_has_no_leading_zeros() {
        let client = SrpClient::new().unwrap();
        let a = client.public_key();
        assert_ne!(a[0], 0);
    }
}
