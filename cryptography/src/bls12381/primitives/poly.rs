//! Polynomial operations over the BLS12-381 scalar field.
//!
//! A polynomial of degree `t - 1` shares a secret (its constant term) such that any `t`
//! evaluations recover it. Participant `i` always receives the evaluation at `x = i + 1`.
//!
//! # Warning
//!
//! The security of the threshold schemes built on top of these operations depends on
//! polynomials never being evaluated at `x = 0`.

use crate::bls12381::primitives::{
    group::{self, Element, Scalar},
    Error,
};
use bytes::{Buf, BufMut};
use epochal_codec::{
    EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use rand::RngCore;

/// Private polynomials are used to generate secret shares.
pub type Private = Poly<group::Private>;

/// Public polynomials represent commitments to secrets on a private polynomial.
pub type Public = Poly<group::Public>;

/// A partial signature (an evaluation of the signature polynomial).
pub type PartialSignature = Eval<group::Signature>;

/// The encoded length of a [PartialSignature].
pub const PARTIAL_SIGNATURE_LENGTH: usize = u32::SIZE + group::SIGNATURE_LENGTH;

/// A polynomial evaluation at a specific index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eval<C: Element> {
    pub index: u32,
    pub value: C,
}

impl<C: Element> Write for Eval<C> {
    fn write(&self, buf: &mut impl BufMut) {
        self.index.write(buf);
        self.value.write(buf);
    }
}

impl<C: Element> Read for Eval<C> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let index = u32::read(buf)?;
        let value = C::read(buf)?;
        Ok(Self { index, value })
    }
}

impl<C: Element> FixedSize for Eval<C> {
    const SIZE: usize = u32::SIZE + C::SIZE;
}

/// A polynomial with scalar variable and coefficients in `C`.
///
/// Always holds at least one coefficient.
#[derive(Debug, Clone, PartialEq, Eq)]
// Reference: https://github.com/celo-org/celo-threshold-bls-rs/blob/a714310be76620e10e8797d6637df64011926430/crates/threshold-bls/src/poly.rs#L24-L28
pub struct Poly<C>(Vec<C>);

/// Returns a new scalar polynomial of the given degree where each coefficient is
/// sampled at random from the provided RNG.
///
/// In the context of secret sharing, the threshold is the degree + 1.
pub fn new_from<R: RngCore>(degree: u32, rng: &mut R) -> Poly<Scalar> {
    let coeffs = (0..=degree).map(|_| Scalar::rand(rng)).collect::<Vec<_>>();
    Poly(coeffs)
}

impl<C> Poly<C> {
    /// Creates a new polynomial from the given coefficients.
    ///
    /// # Panics
    ///
    /// Panics if `coeffs` is empty.
    pub fn from(coeffs: Vec<C>) -> Self {
        assert!(!coeffs.is_empty(), "polynomial must have a coefficient");
        Self(coeffs)
    }

    /// Returns the constant term of the polynomial.
    pub fn constant(&self) -> &C {
        &self.0[0]
    }

    /// Returns the degree of the polynomial.
    pub fn degree(&self) -> u32 {
        (self.0.len() - 1) as u32 // size bounded in constructors and decoding
    }

    /// Returns the number of evaluations required to recover the constant term.
    pub fn required(&self) -> u32 {
        self.0.len() as u32
    }

    /// Returns the coefficients, constant term first.
    pub fn coefficients(&self) -> &[C] {
        &self.0
    }
}

impl<C: Element> Poly<C> {
    /// Commits the scalar polynomial to the group by multiplying each coefficient
    /// with the group's generator.
    pub fn commit(secret: &Poly<Scalar>) -> Self {
        let commits = secret
            .0
            .iter()
            .map(|c| {
                let mut commitment = C::one();
                commitment.mul(c);
                commitment
            })
            .collect::<Vec<C>>();
        Self(commits)
    }

    /// Returns a zero polynomial.
    pub fn zero() -> Self {
        Self(vec![C::zero()])
    }

    /// Performs polynomial addition in place.
    pub fn add(&mut self, other: &Self) {
        // Pad the smaller polynomial with zeros
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), C::zero())
        }
        self.0.iter_mut().zip(&other.0).for_each(|(a, b)| a.add(b))
    }

    /// Evaluates the polynomial at the point assigned to index `i` (`x = i + 1`).
    pub fn evaluate(&self, i: u32) -> Eval<C> {
        let xi = Scalar::from_index(i);

        // Horner's method
        let value = self.0.iter().rev().fold(C::zero(), |mut sum, coeff| {
            sum.mul(&xi);
            sum.add(coeff);
            sum
        });
        Eval { index: i, value }
    }

    /// Recovers the constant term of a polynomial of degree less than `t` from at least
    /// `t` evaluations with distinct indices.
    ///
    /// Evaluations are sorted by index and the first `t` are used, so any two calls with
    /// the same evaluations (in any order) interpolate the same points.
    pub fn recover<'a, I>(t: u32, evals: I) -> Result<C, Error>
    where
        C: 'a,
        I: IntoIterator<Item = &'a Eval<C>>,
    {
        // Reference: https://github.com/celo-org/celo-threshold-bls-rs/blob/a714310be76620e10e8797d6637df64011926430/crates/threshold-bls/src/poly.rs#L131-L165
        let mut evals = evals.into_iter().collect::<Vec<_>>();
        if evals.len() < t as usize {
            return Err(Error::NotEnoughPartialSignatures(t, evals.len() as u32));
        }
        evals.sort_by_key(|e| e.index);
        if evals.windows(2).any(|w| w[0].index == w[1].index) {
            return Err(Error::DuplicateEval);
        }

        let xs = evals
            .into_iter()
            .take(t as usize)
            .map(|e| (e.index, Scalar::from_index(e.index), &e.value))
            .collect::<Vec<_>>();

        // The constant term is `sum_i yi * l_i(0)` where `l_i(0) = prod_{j != i} xj / (xj - xi)`
        xs.iter().try_fold(C::zero(), |mut acc, (i, xi, yi)| {
            let mut num = Scalar::one();
            let mut den = Scalar::one();
            for (j, xj, _) in &xs {
                if i == j {
                    continue;
                }
                num.mul(xj);
                let mut diff = *xj;
                diff.sub(xi);
                den.mul(&diff);
            }
            let inv = den.inverse().ok_or(Error::NoInverse)?;
            num.mul(&inv);

            let mut term = **yi;
            term.mul(&num);
            acc.add(&term);
            Ok(acc)
        })
    }
}

impl<C: Element> Write for Poly<C> {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl<C: Element> Read for Poly<C> {
    /// Bounds the number of coefficients.
    type Cfg = RangeCfg;

    fn read_cfg(buf: &mut impl Buf, range: &RangeCfg) -> Result<Self, CodecError> {
        let coeffs = Vec::<C>::read_cfg(buf, &(*range, ()))?;
        if coeffs.is_empty() {
            return Err(CodecError::Invalid("Poly", "no coefficients"));
        }
        Ok(Self(coeffs))
    }
}

impl<C: Element> EncodeSize for Poly<C> {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// Returns the public key of the polynomial (constant term).
pub fn public(public: &Public) -> &group::Public {
    public.constant()
}

#[cfg(test)]
mod tests {
    // Reference: https://github.com/celo-org/celo-threshold-bls-rs/blob/b0ef82ff79769d085a5a7d3f4fe690b1c8fe6dc9/crates/threshold-bls/src/poly.rs#L355-L604
    use super::*;
    use crate::bls12381::primitives::group::{G1, G2};
    use epochal_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    fn pow(base: Scalar, pow: usize) -> Scalar {
        let mut res = Scalar::one();
        for _ in 0..pow {
            res.mul(&base)
        }
        res
    }

    #[test]
    fn poly_degree() {
        let p = new_from(5, &mut StdRng::seed_from_u64(0));
        assert_eq!(p.degree(), 5);
        assert_eq!(p.required(), 6);
    }

    #[test]
    fn add_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        let p1 = new_from(3, &mut rng);
        let mut res = p1.clone();
        res.add(&Poly::<Scalar>::zero());
        assert_eq!(res, p1);

        let mut res = Poly::<Scalar>::zero();
        res.add(&p1);
        assert_eq!(res, p1);
    }

    #[test]
    fn addition_pads_smaller() {
        let mut rng = StdRng::seed_from_u64(1);
        let small = new_from(1, &mut rng);
        let large = new_from(4, &mut rng);
        let mut res = small.clone();
        res.add(&large);
        assert_eq!(res.degree(), 4);
        for i in 0..5 {
            let mut expected = large.0[i];
            if i < 2 {
                expected.add(&small.0[i]);
            }
            assert_eq!(res.0[i], expected);
        }
    }

    #[test]
    fn commit() {
        let secret = new_from(5, &mut StdRng::seed_from_u64(2));
        let expected = secret
            .0
            .iter()
            .map(|coeff| {
                let mut p = G2::one();
                p.mul(coeff);
                p
            })
            .collect::<Vec<_>>();
        assert_eq!(Poly::from(expected), Poly::<G2>::commit(&secret));
    }

    #[test]
    fn evaluate() {
        let mut rng = StdRng::seed_from_u64(3);
        for degree in 0..8u32 {
            let p = new_from(degree, &mut rng);
            for idx in 0..8u32 {
                let x = Scalar::from_index(idx);
                let mut sum = p.0[0];
                for (i, coeff) in p.0.iter().enumerate().skip(1) {
                    let mut term = *coeff;
                    term.mul(&pow(x, i));
                    sum.add(&term);
                }
                assert_eq!(sum, p.evaluate(idx).value, "degree={degree}, idx={idx}");
            }
        }
    }

    #[test]
    fn evaluate_commitment_matches_share() {
        let secret = new_from(2, &mut StdRng::seed_from_u64(4));
        let public = Public::commit(&secret);
        for idx in 0..5 {
            let mut expected = G1::one();
            expected.mul(&secret.evaluate(idx).value);
            assert_eq!(public.evaluate(idx).value, expected);
        }
    }

    #[test]
    fn interpolation() {
        let mut rng = StdRng::seed_from_u64(5);
        for degree in 0..6u32 {
            for num_evals in 0..8u32 {
                let poly = new_from(degree, &mut rng);
                let expected = poly.0[0];
                let evals = (0..num_evals).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
                let recovered = Poly::recover(num_evals, &evals).unwrap();
                if num_evals > degree {
                    assert_eq!(expected, recovered, "degree={degree}, evals={num_evals}");
                } else {
                    assert_ne!(expected, recovered, "degree={degree}, evals={num_evals}");
                }
            }
        }
    }

    #[test]
    fn interpolation_order_independent() {
        let poly = new_from(2, &mut StdRng::seed_from_u64(6));
        let evals = (0..5).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
        let mut reversed = evals.clone();
        reversed.reverse();
        assert_eq!(
            Poly::recover(3, &evals).unwrap(),
            Poly::recover(3, &reversed).unwrap()
        );
    }

    #[test]
    fn interpolation_insufficient_evals() {
        let poly = new_from(4, &mut StdRng::seed_from_u64(7));
        let evals = (0..4).map(|i| poly.evaluate(i)).collect::<Vec<_>>();
        assert!(matches!(
            Poly::recover(5, &evals),
            Err(Error::NotEnoughPartialSignatures(5, 4))
        ));
    }

    #[test]
    fn interpolation_duplicate_index() {
        let poly = new_from(1, &mut StdRng::seed_from_u64(8));
        let evals = vec![poly.evaluate(1), poly.evaluate(1), poly.evaluate(2)];
        assert!(matches!(
            Poly::recover(2, &evals),
            Err(Error::DuplicateEval)
        ));
    }

    #[test]
    fn test_codec() {
        let original = Public::commit(&new_from(3, &mut StdRng::seed_from_u64(9)));
        let decoded = Public::decode_cfg(original.encode(), &RangeCfg::exact(4)).unwrap();
        assert_eq!(original, decoded);
        assert!(Public::decode_cfg(original.encode(), &RangeCfg::exact(3)).is_err());
        assert!(Public::decode_cfg(&[0u8][..], &RangeCfg::from(..)).is_err());
    }
}
