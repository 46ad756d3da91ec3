use super::{derive_account, recover_signer, Signer};
use crate::{config::Role, hashing::to_hash, perunwire, types::Hash};
use rand::{rngs::StdRng, SeedableRng};

fn data() -> Hash {
    to_hash(&perunwire::Balance {
        balance: vec![vec![0xa1, 0xa2, 0xa3, 0xa4]],
    })
}

macro_rules! make_a_to_b {
    ($name:ident, $seed_a:literal, $seed_b:literal) => {
        #[test]
        fn $name() {
            // Do not use that on any real device, this is just for testing.
            let mut rng = StdRng::seed_from_u64($seed_a);
            let signer = Signer::new(&mut rng);
            let msg = data();
            let sig = signer.sign_eth(msg).unwrap();

            let mut rng = StdRng::seed_from_u64($seed_b);
            let verifier = Signer::new(&mut rng);
            let address = verifier.recover_signer(msg, sig).unwrap();

            assert_eq!(address, signer.address());
        }
    };
}

make_a_to_b!(self_to_self, 0, 0);
make_a_to_b!(a_to_b, 0, 1);

#[test]
fn recover_detects_other_message() {
    let mut rng = StdRng::seed_from_u64(7);
    let signer = Signer::new(&mut rng);
    let sig = signer.sign_eth(data()).unwrap();

    let other = Hash([0x42; 32]);
    // Recovery still yields *an* address, just not the signer's.
    match recover_signer(other, sig) {
        Ok(addr) => assert_ne!(addr, signer.address()),
        Err(_) => {}
    }
}

#[test]
fn recover_rejects_bad_recovery_id() {
    let mut rng = StdRng::seed_from_u64(3);
    let signer = Signer::new(&mut rng);
    let mut sig = signer.sign_eth(data()).unwrap();
    sig.0[64] = 3;
    assert!(recover_signer(data(), sig).is_err());
}

#[test]
fn derived_accounts_are_deterministic_and_distinct() {
    let seed = "pistol kiwi shrug future ozone ostrich match remove crucial oblige cream critic";
    let alice = derive_account(seed, Role::Alice).unwrap();
    let alice_again = derive_account(seed, Role::Alice).unwrap();
    let bob = derive_account(seed, Role::Bob).unwrap();

    assert_eq!(alice.address(), alice_again.address());
    assert_ne!(alice.address(), bob.address());
    assert_ne!(
        alice.address(),
        derive_account("another seed", Role::Alice).unwrap().address()
    );
}
