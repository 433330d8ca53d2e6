use super::{
    errors::PoolError,
    model::FailureRecord,
};
use std::sync::OnceLock;


pub type PoolResult<T, E> = Result<T, PoolError<E>>;


/// Слоты результатов, по одному на входной элемент.
///
/// Каждый слот пишется не более одного раза (индексы задач уникальны),
/// поэтому общей блокировки на коллекцию нет.
pub struct ResultSlots<R> {
    slots: Box<[OnceLock<R>]>,
}

impl<R> ResultSlots<R> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Записывает результат. Возвращает `false`, если слот уже был заполнен
    /// или индекс вне диапазона.
    pub fn set(&self, index: usize, value: R) -> bool {
        match self.slots.get(index) {
            Some(slot) => {
                if slot.set(value).is_err() {
                    tracing::error!(index, "result slot written twice");
                    return false;
                }
                true
            }
            None => {
                tracing::error!(index, len = self.slots.len(), "result slot index out of range");
                false
            }
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&R> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Незаполненный слот становится `None`, порядок входа сохраняется
    pub fn into_vec(self) -> Vec<Option<R>> {
        self.slots
            .into_vec()
            .into_iter()
            .map(OnceLock::into_inner)
            .collect()
    }
}


/// Итог запуска без применения политики `fail_silently`
#[derive(Debug)]
pub struct RunOutcome<T, R, E> {
    pub results: Vec<Option<R>>,
    pub failures: Vec<FailureRecord<T, E>>,
    pub workers: usize,
}

impl<T, R, E> RunOutcome<T, R, E> {
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }

    /// Индексы слотов, оставшихся без результата
    pub fn unset_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect()
    }
}
