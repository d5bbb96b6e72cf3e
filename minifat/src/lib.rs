//! Système de fichiers plat de type FAT dans une image disque virtuelle.
//!
//! Le volume est découpé en blocs de 4096 octets :
//! - bloc 0 : le superbloc (signature + géométrie),
//! - blocs 1..=fat_blocks : la FAT, entrées de 16 bits,
//! - le bloc suivant : le répertoire racine, 128 entrées de 32 octets,
//! - le reste : les blocs de données, chaînés à travers la FAT.
//!
//! Tout l'accès au disque passe par le contrat [`vdisk::BlockDevice`]. Le
//! montage charge les métadonnées en mémoire, le démontage les réécrit; entre
//! les deux, les fichiers se manipulent à travers une table de 32
//! descripteurs ouverts, chacun avec sa position courante.
//!
//! Notes :
//! - le répertoire est plat, pas de sous-répertoires ni de séparateurs,
//! - mono-thread, pas de journalisation : un arrêt brutal entre montage et
//!   démontage laisse les métadonnées du disque en retard sur la mémoire,
//! - l'entrée 0 de la FAT est réservée et reste en fin de chaîne permanente.

mod dir_entry;
mod mkfs;
mod superblock;

pub use dir_entry::DirEntry;
pub use mkfs::format;
pub use superblock::{Superblock, SIGNATURE};

use log::{debug, warn};
use thiserror::Error;

use vdisk::{BlockDevice, DiskError, BLOCK_SIZE};

use dir_entry::ENTRY_SIZE;

/// Marque de fin de chaîne dans la FAT.
pub const FAT_EOC: u16 = 0xFFFF;

/// Nombre d'entrées du répertoire racine.
pub const MAX_FILES: usize = 128;

/// Nombre maximal de descripteurs ouverts simultanément.
pub const MAX_OPEN: usize = 32;

/// Longueur maximale d'un nom de fichier, NUL final exclu.
pub const MAX_NAME_LEN: usize = 15;

/// Entrées de FAT contenues dans un bloc.
const FAT_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 2;

/// Erreurs de l'API du système de fichiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    /// L'image n'est pas un volume valide (signature, géométrie, FAT).
    #[error("volume invalide")]
    BadDisk,
    /// Erreur d'entrée/sortie du disque sous-jacent.
    #[error("erreur d'E/S du disque")]
    Io,
    /// Aucun fichier de ce nom dans le répertoire racine.
    #[error("fichier introuvable")]
    NotFound,
    /// Un fichier du même nom existe déjà.
    #[error("le fichier existe déjà")]
    AlreadyExists,
    /// Nom vide, non ASCII, ou contenant un NUL ou un séparateur.
    #[error("nom de fichier invalide")]
    BadName,
    /// Nom de plus de 15 octets.
    #[error("nom de fichier trop long")]
    NameTooLong,
    /// Les 128 entrées du répertoire racine sont occupées.
    #[error("répertoire racine plein")]
    DirFull,
    /// Plus aucune entrée libre dans la FAT.
    #[error("FAT pleine")]
    FatFull,
    /// Les 32 descripteurs sont déjà ouverts.
    #[error("trop de fichiers ouverts")]
    TooManyOpen,
    /// Le descripteur ne désigne aucun fichier ouvert.
    #[error("descripteur invalide")]
    BadDescriptor,
    /// Déplacement au-delà de la fin du fichier.
    #[error("position hors du fichier")]
    SeekOutOfRange,
    /// Suppression refusée : le fichier est encore ouvert.
    #[error("fichier encore ouvert")]
    FileBusy,
    /// Démontage refusé : des descripteurs sont encore ouverts.
    #[error("descripteurs encore ouverts")]
    OpenDescriptors,
}

impl From<DiskError> for FsError {
    fn from(e: DiskError) -> Self {
        warn!("E/S disque: {e}");
        FsError::Io
    }
}

/// Descripteur ouvert : entrée du répertoire + position courante.
#[derive(Debug, Clone, Copy)]
struct OpenFile {
    slot: usize,
    offset: u32,
}

/// Fiche d'un fichier présent, renvoyée par [`FileSystem::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Nom du fichier.
    pub name: String,
    /// Taille en octets.
    pub size: u32,
    /// Première entrée de FAT de la chaîne (`FAT_EOC` si vide).
    pub first_index: u16,
}

/// Un volume monté.
///
/// La valeur possède le disque et les métadonnées chargées; il n'existe pas
/// d'état « monté » à côté : monter construit la valeur, démonter la consomme
/// après avoir réécrit superbloc, FAT et racine.
pub struct FileSystem<D: BlockDevice> {
    disk: D,
    sb: Superblock,
    fat: Vec<u16>,
    root: [DirEntry; MAX_FILES],
    fds: [Option<OpenFile>; MAX_OPEN],
}

impl<D: BlockDevice> std::fmt::Debug for FileSystem<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("superblock", &self.sb)
            .field("open_descriptors", &self.fds.iter().flatten().count())
            .finish_non_exhaustive()
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Monte un volume : lit et valide le superbloc, charge la FAT et le
    /// répertoire racine, initialise la table des descripteurs.
    ///
    /// En cas d'échec le disque est relâché avec la valeur.
    pub fn mount(mut disk: D) -> Result<Self, FsError> {
        let mut block = [0u8; BLOCK_SIZE];
        disk.read_block(0, &mut block)?;
        let sb = Superblock::parse(&block)?;
        sb.validate(disk.count())?;

        // La FAT occupe fat_blocks blocs consécutifs à partir du bloc 1; on
        // ne garde que les data_blocks entrées qui décrivent un bloc réel.
        let mut fat: Vec<u16> = Vec::with_capacity(sb.data_blocks as usize);
        'load: for i in 0..sb.fat_blocks as usize {
            disk.read_block(1 + i, &mut block)?;
            for pair in block.chunks_exact(2) {
                if fat.len() == sb.data_blocks as usize {
                    break 'load;
                }
                fat.push(u16::from_le_bytes([pair[0], pair[1]]));
            }
        }
        if fat[0] != FAT_EOC {
            warn!("entrée 0 de la FAT != fin de chaîne");
            return Err(FsError::BadDisk);
        }

        disk.read_block(sb.root_index as usize, &mut block)?;
        let mut root = [DirEntry::EMPTY; MAX_FILES];
        for (entry, chunk) in root.iter_mut().zip(block.chunks_exact(ENTRY_SIZE)) {
            let mut raw = [0u8; ENTRY_SIZE];
            raw.copy_from_slice(chunk);
            *entry = DirEntry::parse(&raw);
        }

        debug!(
            "volume monté: {} blocs dont {} de données",
            sb.total_blocks, sb.data_blocks
        );
        Ok(Self { disk, sb, fat, root, fds: [None; MAX_OPEN] })
    }

    /// Démonte le volume : réécrit superbloc, FAT puis racine, et rend le
    /// disque au caller.
    ///
    /// Échoue si des descripteurs sont encore ouverts; la valeur est alors
    /// rendue avec l'erreur (même forme que `BufWriter::into_inner`) pour que
    /// le caller puisse fermer les descripteurs et réessayer.
    pub fn unmount(mut self) -> Result<D, (Self, FsError)> {
        if self.fds.iter().any(Option::is_some) {
            return Err((self, FsError::OpenDescriptors));
        }
        if let Err(e) = self.flush() {
            return Err((self, e));
        }

        debug!("volume démonté");
        Ok(self.disk)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.disk.write_block(0, &self.sb.serialize())?;
        for i in 0..self.sb.fat_blocks as usize {
            self.disk.write_block(1 + i, &fat_block(&self.fat, i))?;
        }

        let mut block = [0u8; BLOCK_SIZE];
        for (entry, chunk) in self.root.iter().zip(block.chunks_exact_mut(ENTRY_SIZE)) {
            chunk.copy_from_slice(&entry.serialize());
        }
        self.disk.write_block(self.sb.root_index as usize, &block)?;
        Ok(())
    }

    /// Géométrie du volume.
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    // ---------- diagnostic ----------

    /// Lignes de diagnostic du volume : géométrie et taux d'occupation.
    pub fn info(&self) -> String {
        let fat_free = self.fat.iter().filter(|&&e| e == 0).count();
        let root_free = self.root.iter().filter(|e| e.is_empty()).count();

        format!(
            "FS Info:\n\
             total_blk_count={}\n\
             fat_blk_count={}\n\
             rdir_blk={}\n\
             data_blk={}\n\
             data_blk_count={}\n\
             fat_free_ratio={}/{}\n\
             rdir_free_ratio={}/{}\n",
            self.sb.total_blocks,
            self.sb.fat_blocks,
            self.sb.root_index,
            self.sb.data_index,
            self.sb.data_blocks,
            fat_free,
            self.sb.data_blocks,
            root_free,
            MAX_FILES,
        )
    }

    /// Listing du répertoire racine, dans l'ordre des entrées.
    pub fn ls(&self) -> String {
        let mut out = String::from("FS Ls:\n");
        for entry in self.root.iter().filter(|e| !e.is_empty()) {
            out.push_str(&format!(
                "file: {}, size: {}, data_blk: {}\n",
                entry.name_lossy(),
                entry.size,
                entry.first_index
            ));
        }
        out
    }

    /// Fiches des fichiers présents, dans l'ordre des entrées.
    pub fn list_files(&self) -> Vec<FileInfo> {
        self.root
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| FileInfo {
                name: e.name_lossy(),
                size: e.size,
                first_index: e.first_index,
            })
            .collect()
    }

    // ---------- répertoire racine ----------

    /// Crée un fichier vide dans le répertoire racine.
    ///
    /// Aucun bloc de données n'est alloué : la chaîne naît à la première
    /// écriture.
    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        dir_entry::validate_name(name)?;
        if self.lookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let slot = self
            .root
            .iter()
            .position(|e| e.is_empty())
            .ok_or(FsError::DirFull)?;
        self.root[slot] = DirEntry::new(name);

        debug!("fichier {name} créé (entrée {slot})");
        Ok(())
    }

    /// Supprime un fichier et libère sa chaîne de blocs.
    ///
    /// Refusé tant qu'un descripteur ouvert référence le fichier.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        let slot = self.lookup(name).ok_or(FsError::NotFound)?;
        if self.fds.iter().flatten().any(|fd| fd.slot == slot) {
            return Err(FsError::FileBusy);
        }

        let first = self.root[slot].first_index;
        self.free_chain(first);
        self.root[slot] = DirEntry::EMPTY;

        debug!("fichier {name} supprimé (entrée {slot})");
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.root.iter().position(|e| !e.is_empty() && e.matches(name))
    }

    // ---------- descripteurs ----------

    /// Ouvre un fichier et renvoie un descripteur, position à 0.
    ///
    /// Le descripteur est l'indice du slot occupé dans la table; plusieurs
    /// descripteurs peuvent viser le même fichier, chacun avec sa position.
    pub fn open(&mut self, name: &str) -> Result<usize, FsError> {
        let slot = self.lookup(name).ok_or(FsError::NotFound)?;
        let fd = self
            .fds
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TooManyOpen)?;

        self.fds[fd] = Some(OpenFile { slot, offset: 0 });
        Ok(fd)
    }

    /// Ferme un descripteur. Le même numéro redevient refusé jusqu'à une
    /// prochaine ouverture.
    pub fn close(&mut self, fd: usize) -> Result<(), FsError> {
        let slot = self.fds.get_mut(fd).ok_or(FsError::BadDescriptor)?;
        if slot.take().is_none() {
            return Err(FsError::BadDescriptor);
        }
        Ok(())
    }

    /// Taille actuelle du fichier désigné par `fd`.
    pub fn stat(&self, fd: usize) -> Result<u32, FsError> {
        let of = self.descriptor(fd)?;
        Ok(self.root[of.slot].size)
    }

    /// Déplace la position courante du descripteur.
    ///
    /// La position doit rester dans le fichier (`offset <= taille`).
    pub fn lseek(&mut self, fd: usize, offset: u32) -> Result<(), FsError> {
        let size = self.stat(fd)?;
        if offset > size {
            return Err(FsError::SeekOutOfRange);
        }

        if let Some(of) = self.fds[fd].as_mut() {
            of.offset = offset;
        }
        Ok(())
    }

    fn descriptor(&self, fd: usize) -> Result<OpenFile, FsError> {
        self.fds.get(fd).copied().flatten().ok_or(FsError::BadDescriptor)
    }

    // ---------- lecture / écriture ----------

    /// Lit au plus `buf.len()` octets à partir de la position courante, en
    /// tronquant à la fin du fichier. Avance la position et renvoie le nombre
    /// d'octets copiés; 0 si la position est déjà à la fin.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        let of = self.descriptor(fd)?;
        let entry = self.root[of.slot];
        if buf.is_empty() || of.offset >= entry.size {
            return Ok(0);
        }

        let total = buf.len().min((entry.size - of.offset) as usize);
        let mut done = 0usize;
        let mut bounce = [0u8; BLOCK_SIZE];

        while done < total {
            let offset = of.offset as usize + done;
            let left = offset % BLOCK_SIZE;
            let n = (total - done).min(BLOCK_SIZE - left);

            // offset < taille, donc la chaîne couvre ce bloc sur tout volume sain
            let index = self
                .block_at_offset(entry.first_index, offset)
                .ok_or(FsError::BadDisk)?;
            self.disk.read_block(self.data_block(index), &mut bounce)?;

            buf[done..done + n].copy_from_slice(&bounce[left..left + n]);
            done += n;
        }

        if let Some(of) = self.fds[fd].as_mut() {
            of.offset += done as u32;
        }
        Ok(done)
    }

    /// Écrit `buf` à partir de la position courante, en allongeant la chaîne
    /// à la demande. Avance la position et renvoie le nombre d'octets écrits :
    /// moins que `buf.len()` si la FAT se remplit en cours de route.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize, FsError> {
        let of = self.descriptor(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let slot = of.slot;
        let start = of.offset as usize;
        let mut done = 0usize;
        let mut bounce = [0u8; BLOCK_SIZE];

        while done < buf.len() {
            let offset = start + done;
            let left = offset % BLOCK_SIZE;
            let n = (buf.len() - done).min(BLOCK_SIZE - left);

            let first = self.root[slot].first_index;
            let index = match self.block_at_offset(first, offset) {
                Some(i) => i,
                // bout de chaîne : on alloue un maillon; FAT pleine =>
                // écriture partielle
                None => match self.extend_chain(slot) {
                    Ok(i) => i,
                    Err(FsError::FatFull) => break,
                    Err(e) => return Err(e),
                },
            };

            let disk_index = self.data_block(index);
            if n < BLOCK_SIZE {
                // bloc partiel : les octets autour de la plage écrite doivent
                // survivre, on passe par le bounce buffer
                self.disk.read_block(disk_index, &mut bounce)?;
            }
            bounce[left..left + n].copy_from_slice(&buf[done..done + n]);
            self.disk.write_block(disk_index, &bounce)?;

            done += n;

            // taille et position tenues à jour bloc par bloc
            let end = (start + done) as u32;
            if end > self.root[slot].size {
                self.root[slot].size = end;
            }
            if let Some(of) = self.fds[fd].as_mut() {
                of.offset = end;
            }
        }

        Ok(done)
    }

    /// Bloc du disque qui stocke le bloc de données `fat_index`.
    fn data_block(&self, fat_index: u16) -> usize {
        self.sb.data_index as usize + fat_index as usize
    }

    // ---------- FAT ----------

    /// Plus petite entrée libre de la FAT, s'il en reste une.
    ///
    /// L'entrée 0 est réservée et n'est jamais candidate.
    fn find_free_fat(&self) -> Option<u16> {
        (1..self.fat.len()).find(|&i| self.fat[i] == 0).map(|i| i as u16)
    }

    /// Ajoute un maillon en fin de chaîne du fichier `slot`, ou démarre la
    /// chaîne si le fichier était vide. La FAT reste intacte en cas d'échec.
    fn extend_chain(&mut self, slot: usize) -> Result<u16, FsError> {
        let new = self.find_free_fat().ok_or(FsError::FatFull)?;

        let first = self.root[slot].first_index;
        if first == FAT_EOC {
            self.root[slot].first_index = new;
        } else {
            let tail = self.chain_tail(first);
            self.fat[tail as usize] = new;
        }
        self.fat[new as usize] = FAT_EOC;
        Ok(new)
    }

    /// Dernier maillon de la chaîne commençant à `first`.
    fn chain_tail(&self, first: u16) -> u16 {
        let mut cur = first;
        // une chaîne saine ne dépasse jamais la taille de la FAT
        for _ in 0..self.fat.len() {
            let next = self.fat[cur as usize];
            if next == FAT_EOC || next as usize >= self.fat.len() {
                break;
            }
            cur = next;
        }
        cur
    }

    /// Remet à zéro toute la chaîne commençant à `first`.
    ///
    /// Sans effet si `first` vaut `FAT_EOC` (fichier vide).
    fn free_chain(&mut self, first: u16) {
        let mut cur = first;
        for _ in 0..self.fat.len() {
            // l'entrée 0 reste verrouillée même sur volume corrompu
            if cur == FAT_EOC || cur == 0 || cur as usize >= self.fat.len() {
                break;
            }
            let next = self.fat[cur as usize];
            self.fat[cur as usize] = 0;
            cur = next;
        }
    }

    /// Entrée de FAT du bloc qui contient l'octet `offset` du fichier, ou
    /// `None` si la chaîne s'arrête avant.
    fn block_at_offset(&self, first: u16, offset: usize) -> Option<u16> {
        let mut cur = first;
        let mut hops = offset / BLOCK_SIZE;
        loop {
            if cur == FAT_EOC || cur as usize >= self.fat.len() {
                return None;
            }
            if hops == 0 {
                return Some(cur);
            }
            cur = self.fat[cur as usize];
            hops -= 1;
        }
    }
}

/// Sérialise le bloc `index` de la FAT, entrées manquantes remplies de zéros.
pub(crate) fn fat_block(fat: &[u16], index: usize) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    let start = index * FAT_ENTRIES_PER_BLOCK;
    for (chunk, entry) in block.chunks_exact_mut(2).zip(fat[start.min(fat.len())..].iter()) {
        chunk.copy_from_slice(&entry.to_le_bytes());
    }
    block
}
