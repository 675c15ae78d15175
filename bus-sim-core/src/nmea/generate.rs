//! Synthetic NMEA sentences for the serial sender
//!
//! Every value is a uniform draw over the field's plausible range. The
//! returned strings are complete sentences with a correct checksum.

use rand::Rng;

use super::{build_sentence, SentenceKind};

/// Knots to km/h
const KMH_PER_KNOT: f64 = 1.852;

/// Pick a sentence kind uniformly and generate it
pub fn random_sentence<R: Rng + ?Sized>(rng: &mut R) -> (SentenceKind, String) {
    let kind = SentenceKind::ALL[rng.gen_range(0..SentenceKind::ALL.len())];
    (kind, sentence(kind, rng))
}

/// Generate one sentence of the given kind
pub fn sentence<R: Rng + ?Sized>(kind: SentenceKind, rng: &mut R) -> String {
    match kind {
        SentenceKind::Gga => gga(rng),
        SentenceKind::Hdt => hdt(rng),
        SentenceKind::Vtg => vtg(rng),
    }
}

/// `$GPGGA` position fix
pub fn gga<R: Rng + ?Sized>(rng: &mut R) -> String {
    let time = format!(
        "{:02}{:02}{:02}.{:02}",
        rng.gen_range(0..24),
        rng.gen_range(0..60),
        rng.gen_range(0..60),
        rng.gen_range(0..100)
    );
    let latitude: f64 = rng.gen_range(0.0..=90.0);
    let lat_hemisphere = if rng.gen_bool(0.5) { 'N' } else { 'S' };
    let longitude: f64 = rng.gen_range(0.0..=180.0);
    let lon_hemisphere = if rng.gen_bool(0.5) { 'E' } else { 'W' };

    let body = format!(
        "GPGGA,{},{:.4},{},{:.4},{},{},{:02},{:.1},{:.1},M,{:.1},M,{:.1},{:04}",
        time,
        latitude,
        lat_hemisphere,
        longitude,
        lon_hemisphere,
        rng.gen_range(0..=2),
        rng.gen_range(0..=12),
        rng.gen_range(0.0..=99.9f64),
        rng.gen_range(-1000.0..=10000.0f64),
        rng.gen_range(-9999.9..=9999.9f64),
        rng.gen_range(0.0..=999.9f64),
        rng.gen_range(0..=1023),
    );
    build_sentence(&body)
}

/// `$GPHDT` true heading
pub fn hdt<R: Rng + ?Sized>(rng: &mut R) -> String {
    let heading: f64 = rng.gen_range(0.0..360.0);
    build_sentence(&format!("GPHDT,{:.4},T", heading))
}

/// `$GPVTG` course and speed over ground
pub fn vtg<R: Rng + ?Sized>(rng: &mut R) -> String {
    let track_true: f64 = rng.gen_range(0.0..360.0);
    let track_magnetic: f64 = rng.gen_range(0.0..360.0);
    let knots: f64 = rng.gen_range(0.0..=999.9);
    build_sentence(&format!(
        "GPVTG,{:.4},T,{:.4},M,{:.4},N,{:.4},K",
        track_true,
        track_magnetic,
        knots,
        knots * KMH_PER_KNOT
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::parse;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_sentences_parse() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let (kind, line) = random_sentence(&mut rng);
            let sentence = parse(&line).unwrap();
            assert_eq!(sentence.kind, kind);
            assert_eq!(sentence.fields.len(), kind.labels().len(), "{}", line);
        }
    }

    #[test]
    fn test_gga_fields_within_range() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let sentence = parse(&gga(&mut rng)).unwrap();
            let lat: f64 = sentence.field("latitude").unwrap().parse().unwrap();
            let sats: u32 = sentence.field("satellites").unwrap().parse().unwrap();
            let station: u32 = sentence.field("dgps_station").unwrap().parse().unwrap();

            assert!((0.0..=90.0).contains(&lat));
            assert!(sats <= 12);
            assert!(station <= 1023);
            assert!(matches!(sentence.field("lat_hemisphere"), Some("N") | Some("S")));
            assert_eq!(sentence.field("altitude_unit"), Some("M"));
        }
    }

    #[test]
    fn test_vtg_speed_units_agree() {
        let mut rng = StdRng::seed_from_u64(3);
        let sentence = parse(&vtg(&mut rng)).unwrap();
        let knots: f64 = sentence.field("speed_knots").unwrap().parse().unwrap();
        let kmh: f64 = sentence.field("speed_kmh").unwrap().parse().unwrap();
        assert!((knots * KMH_PER_KNOT - kmh).abs() < 0.001);
    }

    #[test]
    fn test_all_kinds_are_drawn() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(random_sentence(&mut rng).0);
        }
        assert_eq!(seen.len(), 3);
    }
}
