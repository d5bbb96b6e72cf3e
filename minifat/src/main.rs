//! Petite CLI pour créer et manipuler une image minifat.
//!
//! Elle s'appuie sur la bibliothèque `minifat` :
//! - `--mkfs` formate une image neuve,
//! - lecture : `--info`, `--ls`, `--stat`, `--cat`,
//! - écriture : `--create`, `--delete`, `--put`,
//! - sans commande, un mode shell interactif sur l'image montée.
//!
//! Exemple rapide :
//! ```text
//! minifat_cli --file disk.img --mkfs 1024
//! minifat_cli --file disk.img --put notes.txt ./local.txt
//! minifat_cli --file disk.img --cat notes.txt
//! ```

use std::env;
use std::fs;
use std::io::{self, Write};

use minifat::{format, FileSystem, FsError};
use vdisk::ImageDisk;

/// Affiche l'usage de la CLI avec les commandes disponibles.
fn print_usage() {
    eprintln!(
        "Usage:
  minifat_cli --file <disk.img> [--mkfs <blocs>] [--info] [--ls]
              [--create <nom>] [--delete <nom>] [--stat <nom>]
              [--cat <nom>] [--put <nom> <fichier_hote>]

Exemples:
  minifat_cli --file disk.img --mkfs 1024
  minifat_cli --file disk.img --ls
  minifat_cli --file disk.img --put notes.txt ./local.txt

Mode shell:
  minifat_cli --file disk.img
  (puis: info, ls, create, delete, stat, cat, put, help, exit)"
    );
}

/// Affiche l'aide du mode shell interactif.
fn print_shell_help() {
    println!(
        "Commandes:
  info                 - géométrie et occupation du volume
  ls                   - lister le répertoire racine
  create <nom>         - créer un fichier vide
  delete <nom>         - supprimer un fichier
  stat <nom>           - taille d'un fichier
  cat <nom>            - lire un fichier
  put <nom> <src>      - copier un fichier hôte dans l'image
  help                 - cette aide
  exit                 - démonter et quitter"
    );
}

/// Point d'entrée : parse les arguments puis exécute la commande demandée
/// ou bascule en mode shell interactif.
fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);

    let mut image: Option<String> = None;
    let mut command: Option<String> = None;
    let mut target_a: Option<String> = None;
    let mut target_b: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--file" | "-f" => image = args.next(),
            "--info" => command = Some("info".to_string()),
            "--ls" => command = Some("ls".to_string()),
            "--mkfs" | "--create" | "--delete" | "--stat" | "--cat" => {
                command = Some(arg.trim_start_matches('-').to_string());
                target_a = args.next();
            }
            "--put" => {
                command = Some("put".to_string());
                target_a = args.next();
                target_b = args.next();
            }
            _ => {
                eprintln!("Argument inconnu : {arg}");
                print_usage();
                return;
            }
        }
    }

    let image = match image {
        Some(p) => p,
        None => {
            print_usage();
            return;
        }
    };

    match command.as_deref() {
        Some("mkfs") => run_mkfs(&image, target_a.as_deref()),
        Some(cmd) => run_command(&image, cmd, target_a.as_deref(), target_b.as_deref()),
        None => run_shell(&image),
    }
}

/// Crée et formate une image neuve.
fn run_mkfs(image: &str, blocks: Option<&str>) {
    let blocks: usize = match blocks.and_then(|b| b.parse().ok()) {
        Some(n) => n,
        None => {
            eprintln!("--mkfs attend un nombre de blocs");
            return;
        }
    };

    let mut disk = match ImageDisk::create(image, blocks) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Impossible de créer {image}: {e}");
            return;
        }
    };

    match format(&mut disk) {
        Ok(sb) => println!(
            "OK: {image} formatée ({} blocs dont {} de données)",
            sb.total_blocks, sb.data_blocks
        ),
        Err(e) => eprintln!("Formatage de {image} impossible: {e}"),
    }
}

/// Monte l'image, exécute une commande, puis démonte.
fn run_command(image: &str, cmd: &str, target_a: Option<&str>, target_b: Option<&str>) {
    let mut fs = match mount_image(image) {
        Some(fs) => fs,
        None => return,
    };

    match cmd {
        "info" => print!("{}", fs.info()),
        "ls" => print!("{}", fs.ls()),
        "create" => match target_a {
            Some(name) => run_create(&mut fs, name),
            None => eprintln!("--create attend un nom de fichier"),
        },
        "delete" => match target_a {
            Some(name) => run_delete(&mut fs, name),
            None => eprintln!("--delete attend un nom de fichier"),
        },
        "stat" => match target_a {
            Some(name) => run_stat(&mut fs, name),
            None => eprintln!("--stat attend un nom de fichier"),
        },
        "cat" => match target_a {
            Some(name) => run_cat(&mut fs, name),
            None => eprintln!("--cat attend un nom de fichier"),
        },
        "put" => match (target_a, target_b) {
            (Some(name), Some(src)) => run_put(&mut fs, name, src),
            _ => eprintln!("--put attend un nom dans l'image et un fichier source"),
        },
        other => {
            eprintln!("Commande inconnue : {other}");
            print_usage();
        }
    }

    unmount_image(fs);
}

fn mount_image(image: &str) -> Option<FileSystem<ImageDisk>> {
    let disk = match ImageDisk::open(image) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Impossible d'ouvrir {image}: {e}");
            return None;
        }
    };

    match FileSystem::mount(disk) {
        Ok(fs) => Some(fs),
        Err(e) => {
            eprintln!("Montage de {image} impossible: {e}");
            None
        }
    }
}

fn unmount_image(fs: FileSystem<ImageDisk>) {
    if let Err((_, e)) = fs.unmount() {
        eprintln!("Démontage impossible: {e}");
    }
}

fn run_create(fs: &mut FileSystem<ImageDisk>, name: &str) {
    match fs.create(name) {
        Ok(()) => println!("OK: {name} créé"),
        Err(e) => eprintln!("Erreur create {name}: {e}"),
    }
}

fn run_delete(fs: &mut FileSystem<ImageDisk>, name: &str) {
    match fs.delete(name) {
        Ok(()) => println!("OK: {name} supprimé"),
        Err(e) => eprintln!("Erreur delete {name}: {e}"),
    }
}

fn run_stat(fs: &mut FileSystem<ImageDisk>, name: &str) {
    match stat_file(fs, name) {
        Ok(size) => println!("{name}: {size} octets"),
        Err(e) => eprintln!("Erreur stat {name}: {e}"),
    }
}

/// Lit un fichier et écrit son contenu sur la sortie standard.
fn run_cat(fs: &mut FileSystem<ImageDisk>, name: &str) {
    match read_file(fs, name) {
        Ok(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
        Err(e) => eprintln!("Erreur cat {name}: {e}"),
    }
}

/// Copie un fichier hôte dans l'image (création ou remplacement).
fn run_put(fs: &mut FileSystem<ImageDisk>, name: &str, src: &str) {
    let content = match fs::read(src) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Impossible de lire {src}: {e}");
            return;
        }
    };

    match write_file(fs, name, &content) {
        Ok(n) if n == content.len() => println!("OK: {src} -> {name} ({n} octets)"),
        Ok(n) => eprintln!("Écriture partielle de {name}: {n}/{} octets (volume plein)", content.len()),
        Err(e) => eprintln!("Erreur put {name}: {e}"),
    }
}

fn stat_file(fs: &mut FileSystem<ImageDisk>, name: &str) -> Result<u32, FsError> {
    let fd = fs.open(name)?;
    let size = fs.stat(fd)?;
    fs.close(fd)?;
    Ok(size)
}

fn read_file(fs: &mut FileSystem<ImageDisk>, name: &str) -> Result<Vec<u8>, FsError> {
    let fd = fs.open(name)?;
    let size = fs.stat(fd)? as usize;

    let mut out = vec![0u8; size];
    let n = fs.read(fd, &mut out)?;
    out.truncate(n);

    fs.close(fd)?;
    Ok(out)
}

/// Remplace le contenu de `name` par `content`, en créant le fichier au
/// besoin. Renvoie le nombre d'octets réellement écrits.
fn write_file(fs: &mut FileSystem<ImageDisk>, name: &str, content: &[u8]) -> Result<usize, FsError> {
    match fs.delete(name) {
        Ok(()) | Err(FsError::NotFound) => {}
        Err(e) => return Err(e),
    }
    fs.create(name)?;

    let fd = fs.open(name)?;
    let n = fs.write(fd, content)?;
    fs.close(fd)?;
    Ok(n)
}

/// Lance un petit shell interactif sur l'image montée ; le volume est
/// démonté (métadonnées réécrites) à la sortie.
fn run_shell(image: &str) {
    let mut fs = match mount_image(image) {
        Some(fs) => fs,
        None => return,
    };

    println!("minifat shell. Tapez 'help' pour l'aide, 'exit' pour quitter.");

    let stdin = io::stdin();
    loop {
        print!("minifat> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        let n = match stdin.read_line(&mut line) {
            Ok(n) => n,
            Err(_) => break,
        };
        if n == 0 {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap();

        match cmd {
            "exit" | "quit" => break,
            "help" => print_shell_help(),
            "info" => print!("{}", fs.info()),
            "ls" => print!("{}", fs.ls()),
            "create" => match parts.next() {
                Some(name) => run_create(&mut fs, name),
                None => println!("Usage: create <nom>"),
            },
            "delete" => match parts.next() {
                Some(name) => run_delete(&mut fs, name),
                None => println!("Usage: delete <nom>"),
            },
            "stat" => match parts.next() {
                Some(name) => run_stat(&mut fs, name),
                None => println!("Usage: stat <nom>"),
            },
            "cat" => match parts.next() {
                Some(name) => run_cat(&mut fs, name),
                None => println!("Usage: cat <nom>"),
            },
            "put" => match (parts.next(), parts.next()) {
                (Some(name), Some(src)) => run_put(&mut fs, name, src),
                _ => println!("Usage: put <nom> <src_fichier>"),
            },
            _ => println!("Commande inconnue: {cmd}. Tapez 'help'."),
        }
    }

    unmount_image(fs);
}
