//! `iter_sample` (`spec.md` §4.7): Bernoulli sampling bounded by a hard
//! cap, shared sampling idiom with `dk-schema::infer`'s `SamplingPolicy`.

use dk_record::Record;
use rand::Rng;

pub fn iter_sample<I>(records: I, probability: f64, limit: Option<usize>) -> impl Iterator<Item = Record>
where
    I: Iterator<Item = Record>,
{
    let probability = probability.clamp(0.0, 1.0);
    let mut taken = 0usize;
    records.filter(move |_| {
        if let Some(limit) = limit {
            if taken >= limit {
                return false;
            }
        }
        let take = rand::thread_rng().gen_bool(probability);
        if take {
            taken += 1;
        }
        take
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_record::Value;

    #[test]
    fn never_exceeds_the_configured_limit() {
        let records = (0..1000).map(|i| {
            let mut r = Record::new();
            r.insert("i".into(), Value::Int(i));
            r
        });
        let sampled: Vec<_> = iter_sample(records, 1.0, Some(10)).collect();
        assert_eq!(sampled.len(), 10);
    }

    #[test]
    fn zero_probability_yields_nothing() {
        let records = (0..50).map(|i| {
            let mut r = Record::new();
            r.insert("i".into(), Value::Int(i));
            r
        });
        let sampled: Vec<_> = iter_sample(records, 0.0, None).collect();
        assert!(sampled.is_empty());
    }
}
