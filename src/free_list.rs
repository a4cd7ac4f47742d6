/// A bounded slot table whose indices double as a pool of small ids.
///
/// `vacant` names the lowest free index, `insert_at` claims a specific one, and `remove` returns the
/// index to the pool.
#[derive(Debug, Clone)]
pub struct FreeList<T> {
    len: usize,
    capacity: u16,
    inner: Vec<Option<T>>,
}

impl<T> FreeList<T> {
    pub fn new(capacity: u16) -> Self {
        Self {
            len: 0,
            capacity,
            inner: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn capacity(&self) -> u16 {
        self.capacity
    }
    pub fn contains(&self, index: u16) -> bool {
        self.get(index).is_some()
    }

    /// The lowest index not holding a value, if any is left.
    pub fn vacant(&self) -> Option<u16> {
        match self.inner.iter().position(Option::is_none) {
            Some(index) => Some(index as u16),
            None if self.inner.len() < self.capacity as usize => Some(self.inner.len() as u16),
            None => None,
        }
    }

    /// Stores `value` at `index`. Fails if the index is taken or outside the capacity.
    pub fn insert_at(&mut self, index: u16, value: T) -> bool {
        if index >= self.capacity || self.contains(index) {
            return false;
        }
        let index = index as usize;
        if self.inner.len() <= index {
            self.inner.resize_with(index + 1, || None);
        }
        self.inner[index] = Some(value);
        self.len += 1;
        true
    }

    pub fn remove(&mut self, index: u16) -> Option<T> {
        let value = self.inner.get_mut(index as usize)?.take()?;
        self.len -= 1;
        while matches!(self.inner.last(), Some(None)) {
            self.inner.pop();
        }
        Some(value)
    }

    pub fn get(&self, index: u16) -> Option<&T> {
        self.inner.get(index as usize).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &T)> {
        self.inner
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index as u16, value)))
    }

    /// Empties the table and returns every index to the pool.
    pub fn clear(&mut self) -> Vec<T> {
        self.len = 0;
        self.inner.drain(..).flatten().collect()
    }
}
